use court_common::{
    match_snapshot::{MatchSnapshot, Timestamp, normalize},
    projection::CourtView,
    scoring::{MatchAction, apply_action},
};
use log::*;
use serde_json::Value;
use std::{collections::BTreeMap, fmt::Display, future::Future, net::SocketAddr, pin::Pin};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    select,
    sync::{mpsc, oneshot, watch},
    task::{self, JoinHandle},
    time::{Duration, timeout},
};

pub(crate) const TIMEOUT: Duration = Duration::from_millis(500);
const STORE_CHANNEL_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Court keys must not be empty")]
    EmptyCourtKey,
    #[error("Court keys must not start or end with whitespace")]
    PaddedCourtKey,
    #[error("The snapshot store has stopped")]
    ChannelClosed,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Opaque, non-empty identifier of one court. Keys are used exactly as given.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CourtKey(String);

impl CourtKey {
    pub fn new(key: &str) -> Result<Self, SyncError> {
        let trimmed = key.trim();
        if trimmed.is_empty() {
            Err(SyncError::EmptyCourtKey)
        } else if trimmed.len() != key.len() {
            Err(SyncError::PaddedCourtKey)
        } else {
            Ok(Self(key.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CourtKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn now_millis() -> Timestamp {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as Timestamp
}

#[derive(Debug)]
enum StoreMessage {
    Get(CourtKey, oneshot::Sender<MatchSnapshot>),
    Commit(CourtKey, Box<MatchSnapshot>, oneshot::Sender<MatchSnapshot>),
    Apply(CourtKey, MatchAction, oneshot::Sender<MatchSnapshot>),
    Subscribe(CourtKey, oneshot::Sender<watch::Receiver<MatchSnapshot>>),
    ListCourts(oneshot::Sender<Vec<CourtKey>>),
    Stop,
}

/// Cheap handle for talking to the snapshot store
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<StoreMessage>,
}

impl SyncHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> StoreMessage,
    ) -> Result<T, SyncError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SyncError::ChannelClosed)
    }

    /// The latest snapshot for `court`, or a fresh default one if nothing is stored.
    /// Reading never creates the court.
    pub async fn get(&self, court: &CourtKey) -> Result<MatchSnapshot, SyncError> {
        self.request(|reply| StoreMessage::Get(court.clone(), reply))
            .await
    }

    /// Replaces the whole snapshot for `court`. Returns it as stored, with a new timestamp.
    pub async fn commit(
        &self,
        court: &CourtKey,
        snapshot: MatchSnapshot,
    ) -> Result<MatchSnapshot, SyncError> {
        self.request(|reply| StoreMessage::Commit(court.clone(), Box::new(snapshot), reply))
            .await
    }

    /// Runs `action` against the latest snapshot and commits the result in one
    /// store step, so actions from several connections never overwrite each other
    pub async fn apply(
        &self,
        court: &CourtKey,
        action: MatchAction,
    ) -> Result<MatchSnapshot, SyncError> {
        self.request(|reply| StoreMessage::Apply(court.clone(), action, reply))
            .await
    }

    /// Commits data from an outside writer after normalizing it
    pub async fn commit_raw(
        &self,
        court: &CourtKey,
        value: &Value,
    ) -> Result<MatchSnapshot, SyncError> {
        self.commit(court, normalize(value)).await
    }

    /// The receiver already holds the latest snapshot and sees every later commit.
    /// Watching a court with no data does not make it show up in `courts()`.
    pub async fn subscribe(
        &self,
        court: &CourtKey,
    ) -> Result<watch::Receiver<MatchSnapshot>, SyncError> {
        self.request(|reply| StoreMessage::Subscribe(court.clone(), reply))
            .await
    }

    /// Courts that hold committed data
    pub async fn courts(&self) -> Result<Vec<CourtKey>, SyncError> {
        self.request(StoreMessage::ListCourts).await
    }
}

#[derive(Debug)]
pub struct SyncAdapter {
    handle: SyncHandle,
    store_join: JoinHandle<()>,
    listener_join: Option<JoinHandle<()>>,
}

impl SyncAdapter {
    pub fn new(initial: Vec<(CourtKey, MatchSnapshot)>) -> Self {
        let (tx, rx) = mpsc::channel(STORE_CHANNEL_LEN);
        let store_join = task::spawn(Store::new(rx, initial).run_loop());

        Self {
            handle: SyncHandle { tx },
            store_join,
            listener_join: None,
        }
    }

    /// Starts accepting read-only view connections on `view_port`
    pub fn listen_for_views(&mut self, view_port: u16) {
        if let Some(join) = self.listener_join.take() {
            join.abort();
        }
        self.listener_join = Some(task::spawn(view_listener_loop(
            self.handle.clone(),
            view_port,
        )));
    }

    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }
}

impl Drop for SyncAdapter {
    fn drop(&mut self) {
        if self.handle.tx.try_send(StoreMessage::Stop).is_err() {
            self.store_join.abort();
        }
        if let Some(join) = self.listener_join.take() {
            join.abort();
        }
    }
}

#[derive(Debug)]
struct Court {
    tx: watch::Sender<MatchSnapshot>,
    /// False while the court is only being watched
    stored: bool,
}

impl Court {
    fn new(snapshot: MatchSnapshot, stored: bool) -> Self {
        Self {
            tx: watch::channel(snapshot).0,
            stored,
        }
    }
}

#[derive(Debug)]
struct Store {
    rx: mpsc::Receiver<StoreMessage>,
    courts: BTreeMap<CourtKey, Court>,
    last_stamp: Timestamp,
}

impl Store {
    fn new(rx: mpsc::Receiver<StoreMessage>, initial: Vec<(CourtKey, MatchSnapshot)>) -> Self {
        let courts = initial
            .into_iter()
            .map(|(key, snapshot)| (key, Court::new(snapshot, true)))
            .collect();
        Self {
            rx,
            courts,
            last_stamp: 0,
        }
    }

    fn current(&self, key: &CourtKey) -> MatchSnapshot {
        self.courts
            .get(key)
            .map(|court| court.tx.borrow().clone())
            .unwrap_or_default()
    }

    /// Strictly increasing, even if the wall clock stalls or steps back
    fn stamp(&mut self) -> Timestamp {
        self.last_stamp = now_millis().max(self.last_stamp.saturating_add(1));
        self.last_stamp
    }

    fn commit(&mut self, key: CourtKey, mut snapshot: MatchSnapshot) -> MatchSnapshot {
        snapshot.updated_at = self.stamp();
        info!("{key}: {}", CourtView::from(&snapshot));
        let court = self.courts.entry(key).or_insert_with_key(|key| {
            info!("First data for court {key}");
            Court::new(MatchSnapshot::default(), true)
        });
        court.stored = true;
        court.tx.send_replace(snapshot.clone());
        snapshot
    }

    fn subscribe(&mut self, key: CourtKey) -> watch::Receiver<MatchSnapshot> {
        // Watch-only courts are kept just as long as someone is watching them
        self.courts
            .retain(|_, court| court.stored || court.tx.receiver_count() > 0);

        let court = self.courts.entry(key).or_insert_with_key(|key| {
            debug!("Watching court {key} before it has any data");
            Court::new(MatchSnapshot::default(), false)
        });
        let mut rx = court.tx.subscribe();
        rx.mark_changed();
        rx
    }

    async fn run_loop(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                StoreMessage::Get(key, reply) => {
                    let _ = reply.send(self.current(&key));
                }
                StoreMessage::Commit(key, snapshot, reply) => {
                    let stored = self.commit(key, *snapshot);
                    let _ = reply.send(stored);
                }
                StoreMessage::Apply(key, action, reply) => {
                    info!("{key}: applying {action:?}");
                    let next = apply_action(&self.current(&key), &action, now_millis());
                    let stored = self.commit(key, next);
                    let _ = reply.send(stored);
                }
                StoreMessage::Subscribe(key, reply) => {
                    let _ = reply.send(self.subscribe(key));
                }
                StoreMessage::ListCourts(reply) => {
                    let courts = self
                        .courts
                        .iter()
                        .filter(|(_, court)| court.stored)
                        .map(|(key, _)| key.clone())
                        .collect();
                    let _ = reply.send(courts);
                }
                StoreMessage::Stop => break,
            }
        }
        info!("Snapshot store stopped");
    }
}

/// An IPv6 and an IPv4 listener on the same port, whichever of them could be bound
pub(crate) struct Listeners {
    v6: Option<TcpListener>,
    v4: Option<TcpListener>,
}

impl Listeners {
    pub(crate) async fn bind(port: u16, kind: &str) -> Self {
        let v6 = match TcpListener::bind(("::", port)).await {
            Ok(listener) => Some(listener),
            Err(e) => {
                error!("Failed to bind to {kind} port {port}: {e:?}");
                None
            }
        };

        // On some OSs, we must separately listen on IPv4, but on other OSs that
        // that isn't allowed, so we just try to listen on IPv4
        let v4 = TcpListener::bind(("0.0.0.0", port)).await.ok();

        Self { v6, v4 }
    }

    pub(crate) async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        type ListenResult = io::Result<(TcpStream, SocketAddr)>;

        fn create_future<'a>(
            listener: Option<&'a TcpListener>,
        ) -> Pin<Box<dyn Future<Output = ListenResult> + Send + 'a>> {
            if let Some(listener) = listener {
                Box::pin(listener.accept())
            } else {
                Box::pin(std::future::pending())
            }
        }

        select! {
            conn = create_future(self.v6.as_ref()) => conn,
            conn = create_future(self.v4.as_ref()) => conn,
        }
    }
}

async fn view_listener_loop(handle: SyncHandle, view_port: u16) {
    info!("Starting listener for views (port {view_port})");
    let listeners = Listeners::bind(view_port, "view").await;
    info!("View listener started");

    loop {
        match listeners.accept().await {
            Ok((stream, addr)) => {
                info!("New view connection from {addr:?}");
                let handle = handle.clone();
                task::spawn(async move {
                    if let Err(e) = view_worker(handle, stream).await {
                        info!("View connection from {addr:?} ended: {e}");
                    }
                });
            }
            Err(e) => error!("New view connection failed: {e:?}"),
        }
    }
}

/// Reads one line naming the court, then pushes its snapshot on every change
async fn view_worker(handle: SyncHandle, stream: TcpStream) -> Result<(), SyncError> {
    let (read, mut write) = stream.into_split();
    let mut line = String::new();
    BufReader::new(read).read_line(&mut line).await?;

    let court = match CourtKey::new(line.trim_end_matches(['\r', '\n'])) {
        Ok(court) => court,
        Err(e) => {
            let msg = serde_json::json!({ "error": e.to_string() }).to_string() + "\n";
            write_with_timeout(&mut write, msg.as_bytes()).await?;
            return Err(e);
        }
    };

    let mut rx = handle.subscribe(&court).await?;
    debug!("View subscribed to {court}");
    loop {
        rx.changed().await.map_err(|_| SyncError::ChannelClosed)?;
        let data = (serde_json::to_string(&*rx.borrow_and_update())? + "\n").into_bytes();
        write_with_timeout(&mut write, &data).await?;
    }
}

pub(crate) async fn write_with_timeout<T: AsyncWrite + Unpin>(
    write: &mut T,
    data: &[u8],
) -> Result<(), SyncError> {
    match timeout(TIMEOUT, write.write_all(data)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Send failed: {e:?}");
            Err(e.into())
        }
        Err(_) => {
            warn!("Send timed out");
            Ok(())
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use court_common::{
        bundles::SideBundle,
        match_snapshot::{MatchMeta, Point},
        scoring::Direction,
        side::Side,
    };
    use more_asserts::*;
    use std::{io::ErrorKind, sync::Once};
    use tokio::{io::AsyncBufReadExt, time::sleep};

    const VIEW_PORT: u16 = 12355;
    const BAD_KEY_PORT: u16 = 12356;
    const MAX_CONN_FAILS: usize = 20;

    static INIT: Once = Once::new();

    pub(crate) fn initialize() {
        INIT.call_once(|| {
            let _ = env_logger::builder().is_test(true).try_init();
        });
    }

    fn court(key: &str) -> CourtKey {
        CourtKey::new(key).unwrap()
    }

    pub(crate) async fn connect(port: u16) -> TcpStream {
        initialize();
        let mut fail_count = 0;
        loop {
            match TcpStream::connect(("127.0.0.1", port)).await {
                Ok(stream) => return stream,
                Err(e) => {
                    if e.kind() == ErrorKind::ConnectionRefused {
                        assert_le!(fail_count, MAX_CONN_FAILS);
                        fail_count += 1;
                        sleep(Duration::from_millis(25)).await;
                    } else {
                        panic!("Unexpected connection error: {e:?}");
                    }
                }
            };
        }
    }

    #[test]
    fn test_court_key() {
        assert!(matches!(CourtKey::new(""), Err(SyncError::EmptyCourtKey)));
        assert!(matches!(CourtKey::new("  \n"), Err(SyncError::EmptyCourtKey)));
        assert!(matches!(
            CourtKey::new(" court1"),
            Err(SyncError::PaddedCourtKey)
        ));
        assert!(matches!(
            CourtKey::new("court1\n"),
            Err(SyncError::PaddedCourtKey)
        ));
        assert_eq!(CourtKey::new("Court 1").unwrap().as_str(), "Court 1");
        assert_ne!(court("court1"), court("Court1"));
    }

    #[tokio::test]
    async fn test_get_unknown_court_is_default() {
        let adapter = SyncAdapter::new(vec![]);
        let handle = adapter.handle();

        let snapshot = handle.get(&court("court9")).await.unwrap();
        assert_eq!(snapshot, MatchSnapshot::default());
        assert_eq!(handle.courts().await.unwrap(), vec![]);

        handle.commit(&court("court9"), snapshot).await.unwrap();
        assert_eq!(handle.courts().await.unwrap(), vec![court("court9")]);
    }

    #[tokio::test]
    async fn test_watching_does_not_create_courts() {
        let adapter = SyncAdapter::new(vec![(court("centre"), MatchSnapshot::default())]);
        let handle = adapter.handle();

        let ghost = handle.subscribe(&court("ghost")).await.unwrap();
        assert_eq!(*ghost.borrow(), MatchSnapshot::default());
        assert_eq!(handle.courts().await.unwrap(), vec![court("centre")]);
    }

    #[test]
    fn test_store_forgets_closed_watchers() {
        let (_tx, rx) = mpsc::channel(1);
        let mut store = Store::new(rx, vec![(court("centre"), MatchSnapshot::default())]);

        for i in 0..10 {
            drop(store.subscribe(court(&format!("ghost{i}"))));
        }
        let watching = store.subscribe(court("watched"));
        assert_eq!(
            store.courts.keys().collect::<Vec<_>>(),
            vec![&court("centre"), &court("watched")]
        );

        drop(watching);
        drop(store.subscribe(court("centre")));
        assert_eq!(store.courts.keys().collect::<Vec<_>>(), vec![&court("centre")]);
    }

    #[tokio::test]
    async fn test_watcher_sees_first_commit() {
        let adapter = SyncAdapter::new(vec![]);
        let handle = adapter.handle();
        let key = court("late");

        let mut rx = handle.subscribe(&key).await.unwrap();
        rx.changed().await.unwrap();
        let _ = rx.borrow_and_update();

        let mut snapshot = MatchSnapshot::default();
        snapshot.games = SideBundle::new(1, 0);
        let stored = handle.commit(&key, snapshot).await.unwrap();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), stored);
        assert_eq!(handle.courts().await.unwrap(), vec![key]);
    }

    #[tokio::test]
    async fn test_concurrent_applies_are_not_lost() {
        let adapter = SyncAdapter::new(vec![]);
        let key = court("busy");
        let point = MatchAction::Point {
            side: Side::One,
            direction: Direction::Increment,
        };

        let mut joins = vec![];
        for _ in 0..3 {
            let handle = adapter.handle();
            let key = key.clone();
            let point = point.clone();
            joins.push(task::spawn(async move { handle.apply(&key, point).await }));
        }
        for join in joins {
            join.await.unwrap().unwrap();
        }

        let stored = adapter.handle().get(&key).await.unwrap();
        assert_eq!(stored.points, SideBundle::new(Point::Forty, Point::Love));
    }

    #[tokio::test]
    async fn test_initial_courts() {
        let meta = MatchMeta {
            name: "Centre".to_string(),
            ..Default::default()
        };
        let adapter = SyncAdapter::new(vec![(
            court("centre"),
            MatchSnapshot::with_meta(meta.clone()),
        )]);
        let handle = adapter.handle();

        assert_eq!(handle.get(&court("centre")).await.unwrap().meta, meta);
    }

    #[tokio::test]
    async fn test_commit_stamps_and_replaces() {
        initialize();
        let adapter = SyncAdapter::new(vec![]);
        let handle = adapter.handle();
        let key = court("court1");

        let mut snapshot = MatchSnapshot::default();
        snapshot.games = SideBundle::new(3, 2);
        let first = handle.commit(&key, snapshot.clone()).await.unwrap();
        assert_gt!(first.updated_at, 0);
        assert_eq!(first.games, snapshot.games);

        let second = handle.commit(&key, snapshot).await.unwrap();
        assert_gt!(second.updated_at, first.updated_at);
        assert_eq!(handle.get(&key).await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_commit_raw_normalizes() {
        let adapter = SyncAdapter::new(vec![]);
        let handle = adapter.handle();
        let key = court("court2");

        let raw = serde_json::json!({
            "points": { "side1": "40", "side2": "bogus" },
            "sets": { "side1": [6, 2], "side2": [4] },
            "server": "side2",
        });
        let stored = handle.commit_raw(&key, &raw).await.unwrap();
        assert_eq!(stored.points, SideBundle::new(Point::Forty, Point::Love));
        assert_eq!(stored.sets, SideBundle::new(vec![6], vec![4]));
        assert_eq!(stored.server, Side::Two);
    }

    #[tokio::test]
    async fn test_subscribe_sees_latest() {
        let adapter = SyncAdapter::new(vec![]);
        let handle = adapter.handle();
        let key = court("court3");

        let mut rx = handle.subscribe(&key).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), MatchSnapshot::default());

        let mut snapshot = MatchSnapshot::default();
        snapshot.tiebreak = true;
        handle.commit(&key, snapshot.clone()).await.unwrap();
        snapshot.tiebreak = false;
        let last = handle.commit(&key, snapshot).await.unwrap();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), last);
    }

    #[tokio::test]
    async fn test_view_connection() {
        let mut adapter = SyncAdapter::new(vec![]);
        adapter.listen_for_views(VIEW_PORT);
        let handle = adapter.handle();
        let key = court("court1");

        let mut conn = connect(VIEW_PORT).await;
        conn.write_all(b"court1\n").await.unwrap();
        let mut lines = BufReader::new(conn).lines();

        let first = lines.next_line().await.unwrap().unwrap();
        let first: MatchSnapshot = serde_json::from_str(&first).unwrap();
        assert_eq!(first, MatchSnapshot::default());

        let mut snapshot = MatchSnapshot::default();
        snapshot.points = SideBundle::new(Point::Fifteen, Point::Love);
        let stored = handle.commit(&key, snapshot).await.unwrap();

        let second = lines.next_line().await.unwrap().unwrap();
        let second: MatchSnapshot = serde_json::from_str(&second).unwrap();
        assert_eq!(second, stored);
    }

    #[tokio::test]
    async fn test_view_connection_bad_key() {
        let mut adapter = SyncAdapter::new(vec![]);
        adapter.listen_for_views(BAD_KEY_PORT);

        let mut conn = connect(BAD_KEY_PORT).await;
        conn.write_all(b"   \n").await.unwrap();
        let mut lines = BufReader::new(conn).lines();

        let reply = lines.next_line().await.unwrap().unwrap();
        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["error"], "Court keys must not be empty");
        assert_eq!(lines.next_line().await.unwrap(), None);
    }
}
