use crate::sync_adapter::{CourtKey, Listeners, SyncError, SyncHandle, write_with_timeout};
use court_common::{match_snapshot::MatchSnapshot, scoring::MatchAction};
use log::*;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpStream,
    task::{self, JoinHandle},
};

/// The writer for the courts it is given actions for
#[derive(Debug, Clone)]
pub struct Controller {
    sync: SyncHandle,
}

impl Controller {
    pub fn new(sync: SyncHandle) -> Self {
        Self { sync }
    }

    /// Applies `action` to the latest snapshot of `court` and commits the whole result.
    /// Controllers sharing one store never lose each other's actions. Separate
    /// stores writing the same court resolve by last write wins.
    pub async fn act(
        &self,
        court: &CourtKey,
        action: &MatchAction,
    ) -> Result<MatchSnapshot, SyncError> {
        self.sync.apply(court, action.clone()).await
    }

    /// Replaces the court's snapshot with data from elsewhere, e.g. a restored
    /// backup. Whatever is missing or out of range is replaced by defaults.
    pub async fn replace(
        &self,
        court: &CourtKey,
        snapshot: &Value,
    ) -> Result<MatchSnapshot, SyncError> {
        info!("{court}: replacing snapshot");
        self.sync.commit_raw(court, snapshot).await
    }

    pub async fn courts(&self) -> Result<Vec<CourtKey>, SyncError> {
        self.sync.courts().await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "camelCase")]
pub enum ControlRequest {
    Act { court: String, action: MatchAction },
    Replace { court: String, snapshot: Value },
    Courts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlResponse {
    Ok(Box<MatchSnapshot>),
    Courts(Vec<String>),
    Error(String),
}

impl Controller {
    async fn handle_line(&self, line: &str) -> ControlResponse {
        let request: ControlRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Malformed control request: {e}");
                return ControlResponse::Error(format!("Malformed request: {e}"));
            }
        };

        let result = match &request {
            ControlRequest::Act { court, action } => match CourtKey::new(court) {
                Ok(court) => self.act(&court, action).await.map(Box::new),
                Err(e) => Err(e),
            },
            ControlRequest::Replace { court, snapshot } => match CourtKey::new(court) {
                Ok(court) => self.replace(&court, snapshot).await.map(Box::new),
                Err(e) => Err(e),
            },
            ControlRequest::Courts => {
                return match self.courts().await {
                    Ok(courts) => ControlResponse::Courts(
                        courts.iter().map(|key| key.as_str().to_string()).collect(),
                    ),
                    Err(e) => ControlResponse::Error(e.to_string()),
                };
            }
        };
        match result {
            Ok(snapshot) => ControlResponse::Ok(snapshot),
            Err(e) => {
                warn!("Control request {request:?} failed: {e}");
                ControlResponse::Error(e.to_string())
            }
        }
    }
}

pub fn spawn_control_listener(controller: Controller, control_port: u16) -> JoinHandle<()> {
    task::spawn(control_listener_loop(controller, control_port))
}

async fn control_listener_loop(controller: Controller, control_port: u16) {
    info!("Starting listener for controllers (port {control_port})");
    let listeners = Listeners::bind(control_port, "control").await;
    info!("Control listener started");

    loop {
        match listeners.accept().await {
            Ok((stream, addr)) => {
                info!("New controller connection from {addr:?}");
                let controller = controller.clone();
                task::spawn(async move {
                    match control_worker(controller, stream).await {
                        Ok(()) => info!("Controller at {addr:?} disconnected"),
                        Err(e) => warn!("Controller connection from {addr:?} failed: {e}"),
                    }
                });
            }
            Err(e) => error!("New controller connection failed: {e:?}"),
        }
    }
}

/// Answers each newline delimited request with one response line
async fn control_worker(controller: Controller, stream: TcpStream) -> Result<(), SyncError> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = controller.handle_line(&line).await;
        let data = (serde_json::to_string(&response)? + "\n").into_bytes();
        write_with_timeout(&mut write, &data).await?;
    }

    Ok(())
}
