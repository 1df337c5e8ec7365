pub mod bundles;

pub mod config;

pub mod match_snapshot;

pub mod projection;

pub mod scoring;

pub mod side;
