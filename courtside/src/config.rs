use derivative::Derivative;
use serde_derive::{Deserialize, Serialize};
pub use court_common::config::MatchDefaults;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub view_port: u16,
    pub control_port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            view_port: 8000,
            control_port: 8001,
        }
    }
}

#[derive(Clone, Debug, Derivative, PartialEq, Eq, Serialize, Deserialize)]
#[derivative(Default)]
pub struct Config {
    /// Courts that exist from startup, others are created when first used
    #[derivative(Default(value = "default_courts()"))]
    pub courts: Vec<String>,
    pub server: Server,
    pub match_defaults: MatchDefaults,
}

fn default_courts() -> Vec<String> {
    vec!["court1".to_string(), "court2".to_string(), "court3".to_string()]
}

#[cfg(test)]
mod test {
    use super::*;
    use court_common::match_snapshot::BestOf;

    #[test]
    fn test_ser_server() {
        let server: Server = Default::default();
        let serialized = toml::to_string(&server).unwrap();
        let deser = toml::from_str(&serialized);
        assert_eq!(deser, Ok(server));
    }

    #[test]
    fn test_ser_config() {
        let config: Config = Default::default();
        let serialized = toml::to_string(&config).unwrap();
        let deser = toml::from_str(&serialized);
        assert_eq!(deser, Ok(config));
    }

    #[test]
    fn test_deser_custom_config() {
        let config: Config = toml::from_str(
            r#"courts = ["centre", "outside"]

               [server]
               view_port = 9000
               control_port = 9001

               [match_defaults]
               name = "Club Night"
               best_of = 5
               golden_point = true"#,
        )
        .unwrap();
        assert_eq!(config.courts, vec!["centre", "outside"]);
        assert_eq!(config.server.control_port, 9001);
        assert_eq!(config.match_defaults.best_of, BestOf::Five);
        assert!(config.match_defaults.golden_point);
    }
}
