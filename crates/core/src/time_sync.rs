//! Timestamp reconciliation for supplemental sessions.
//!
//! A supplemental session is a second recorded timeline stitched into the
//! primary one through [Connection]s: pairs of causally linked events, one
//! on each side. Times reported by a supplemental session are mapped into
//! primary time before they are compared with primary data.
//!
//! ### Constant delta
//!
//! Each connection bounds the offset `delta = server_time - client_time`:
//! - `client_first` connections require the mapped server event to not be
//!   earlier than its client event, an upper bound on delta.
//! - the others require it to not be later, a lower bound.
//!
//! When the tightest upper bound is at least the tightest lower bound, the
//! midpoint is used for every time. With only one kind of connection, the
//! bound itself is used, nudged by epsilon so paired events never collide.
//!
//! ### Interpolation
//!
//! Without a consistent delta, each connection becomes an anchor at its
//! server time, mapped to its client time nudged by epsilon in the
//! direction `client_first` implies. Times between anchors are linearly
//! interpolated, times outside them are shifted by the nearest anchor's
//! offset. Anchor values are forced non-decreasing, so the mapping is
//! monotonic.

use replay_cache_api::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// SessionTimeSynchronizer configuration types.
pub mod config {
    /// Configuration parameters for
    /// [SessionTimeSynchronizer](super::SessionTimeSynchronizer).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(default, rename_all = "camelCase")]
    pub struct TimeSyncConfig {
        /// The nudge keeping paired cross-timeline events apart, in
        /// milliseconds. Default: 1e-6.
        pub epsilon: f64,
    }

    impl Default for TimeSyncConfig {
        fn default() -> Self {
            Self { epsilon: 1e-6 }
        }
    }

    impl replay_cache_api::config::ModConfig for TimeSyncConfig {
        const MODULE_NAME: &'static str = "timeSync";
    }
}

pub use config::*;

/// A causal link between a primary and a supplemental event.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// The event on the primary timeline.
    pub client_point: ExecutionPoint,
    /// Primary time of the client event.
    pub client_time: f64,
    /// The event on the supplemental timeline.
    pub server_point: ExecutionPoint,
    /// Supplemental time of the server event.
    pub server_time: f64,
    /// Whether the client event happens no later than the server event.
    pub client_first: bool,
}

impl Connection {
    fn offset(&self) -> f64 {
        self.server_time - self.client_time
    }
}

/// A supplemental timeline and its connections to the primary one.
#[derive(Debug)]
pub struct SupplementalSession {
    id: String,
    connections: Vec<Connection>,
    epsilon: f64,
    delta: OnceLock<Option<f64>>,
    anchors: OnceLock<Vec<(f64, f64)>>,
}

impl SupplementalSession {
    /// Construct a session. Connections may be given in any order.
    pub fn new(
        id: impl Into<String>,
        mut connections: Vec<Connection>,
        epsilon: f64,
    ) -> ReplayResult<Self> {
        let id = id.into();
        if connections.is_empty() {
            return Err(ReplayError::invariant(format!(
                "supplemental session {id} has no connections"
            )));
        }
        if connections
            .iter()
            .any(|c| !c.client_time.is_finite() || !c.server_time.is_finite())
        {
            return Err(ReplayError::invariant(format!(
                "supplemental session {id} has a non-finite connection time"
            )));
        }
        connections.sort_by(|a, b| a.server_time.total_cmp(&b.server_time));
        Ok(Self {
            id,
            connections,
            epsilon,
            delta: OnceLock::new(),
            anchors: OnceLock::new(),
        })
    }

    /// The session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The connections, ordered by server time.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// The constant offset between this session and the primary timeline,
    /// if the connections admit one.
    pub fn time_delta(&self) -> Option<f64> {
        *self.delta.get_or_init(|| {
            let client_first = self
                .connections
                .iter()
                .filter(|c| c.client_first)
                .map(Connection::offset)
                .reduce(f64::min);
            let server_first = self
                .connections
                .iter()
                .filter(|c| !c.client_first)
                .map(Connection::offset)
                .reduce(f64::max);

            match (client_first, server_first) {
                (Some(upper), Some(lower)) if upper >= lower => {
                    Some((upper + lower) / 2.0)
                }
                (Some(_), Some(_)) => None,
                (Some(upper), None) => Some(upper - self.epsilon),
                (None, Some(lower)) => Some(lower + self.epsilon),
                (None, None) => None,
            }
        })
    }

    /// Map a supplemental time into primary time.
    pub fn normalize(&self, time: f64) -> f64 {
        if let Some(delta) = self.time_delta() {
            return time - delta;
        }

        let anchors = self.anchors();
        let (first, last) = (anchors[0], anchors[anchors.len() - 1]);

        if time <= first.0 {
            return first.1 - (first.0 - time);
        }
        if time >= last.0 {
            return last.1 + (time - last.0);
        }

        let hi = anchors.partition_point(|a| a.0 <= time);
        let (lo, hi) = (anchors[hi - 1], anchors[hi]);
        let frac = (time - lo.0) / (hi.0 - lo.0);
        (lo.1 + (hi.1 - lo.1) * frac).clamp(lo.1, hi.1)
    }

    fn anchors(&self) -> &[(f64, f64)] {
        self.anchors.get_or_init(|| {
            let mut floor = f64::NEG_INFINITY;
            self.connections
                .iter()
                .map(|c| {
                    let nudge = if c.client_first {
                        self.epsilon
                    } else {
                        -self.epsilon
                    };
                    floor = floor.max(c.client_time + nudge);
                    (c.server_time, floor)
                })
                .collect()
        })
    }
}

/// Registry of supplemental sessions for one client.
#[derive(Debug)]
pub struct SessionTimeSynchronizer {
    config: TimeSyncConfig,
    sessions: Mutex<HashMap<String, Arc<SupplementalSession>>>,
}

impl SessionTimeSynchronizer {
    /// Construct an empty synchronizer.
    pub fn new(config: TimeSyncConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a session, replacing any previous one with the same id.
    pub fn add_session(
        &self,
        id: impl Into<String>,
        connections: Vec<Connection>,
    ) -> ReplayResult<()> {
        let session = Arc::new(SupplementalSession::new(
            id,
            connections,
            self.config.epsilon,
        )?);
        tracing::debug!(
            id = %session.id(),
            connections = session.connections().len(),
            "added supplemental session"
        );
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id().to_string(), session);
        Ok(())
    }

    /// Forget a session.
    pub fn remove_session(&self, id: &str) -> bool {
        self.sessions.lock().unwrap().remove(id).is_some()
    }

    /// Forget every session.
    pub fn clear(&self) {
        self.sessions.lock().unwrap().clear();
    }

    /// Get a registered session.
    pub fn session(&self, id: &str) -> ReplayResult<Arc<SupplementalSession>> {
        self.sessions.lock().unwrap().get(id).cloned().ok_or_else(|| {
            ReplayError::invariant(format!("unknown supplemental session {id}"))
        })
    }

    /// The constant offset of a session, if its connections admit one.
    pub fn time_delta(&self, id: &str) -> ReplayResult<Option<f64>> {
        Ok(self.session(id)?.time_delta())
    }

    /// Map a time reported by session `id` into primary time.
    pub fn normalize_supplemental_time(
        &self,
        id: &str,
        time: f64,
    ) -> ReplayResult<f64> {
        if !time.is_finite() {
            return Err(ReplayError::invariant(format!(
                "cannot normalize non-finite time {time}"
            )));
        }
        Ok(self.session(id)?.normalize(time))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    const EPS: f64 = 1e-6;

    fn conn(
        client_time: f64,
        server_time: f64,
        client_first: bool,
    ) -> Connection {
        Connection {
            client_point: ExecutionPoint::zero(),
            client_time,
            server_point: ExecutionPoint::zero(),
            server_time,
            client_first,
        }
    }

    fn sync() -> SessionTimeSynchronizer {
        SessionTimeSynchronizer::new(TimeSyncConfig::default())
    }

    #[test]
    fn consistent_connections_give_mean_delta() {
        let s = sync();
        s.add_session(
            "s1",
            vec![conn(20.0, 18.0, false), conn(10.0, 15.0, true)],
        )
        .unwrap();

        assert_eq!(Some(1.5), s.time_delta("s1").unwrap());
        for t in [0.0, 15.0, 18.0, 1000.25] {
            assert_eq!(
                t - 1.5,
                s.normalize_supplemental_time("s1", t).unwrap()
            );
        }
    }

    #[test]
    fn one_sided_connections_use_their_bound() {
        let s = sync();
        s.add_session(
            "cf",
            vec![conn(10.0, 15.0, true), conn(11.0, 20.0, true)],
        )
        .unwrap();
        s.add_session("sf", vec![conn(20.0, 18.0, false)]).unwrap();

        assert_eq!(Some(5.0 - EPS), s.time_delta("cf").unwrap());
        assert_eq!(Some(-2.0 + EPS), s.time_delta("sf").unwrap());

        // the server event lands just after its client event
        let mapped = s.normalize_supplemental_time("cf", 15.0).unwrap();
        assert!(mapped > 10.0);
        // and just before it for a server-first connection
        let mapped = s.normalize_supplemental_time("sf", 18.0).unwrap();
        assert!(mapped < 20.0);
    }

    #[test]
    fn inconsistent_connections_interpolate() {
        let s = sync();
        // the supplemental clock runs slower than the primary one
        s.add_session(
            "s1",
            vec![conn(10.0, 0.0, true), conn(30.0, 30.0, false)],
        )
        .unwrap();
        assert_eq!(None, s.time_delta("s1").unwrap());

        let n = |t| s.normalize_supplemental_time("s1", t).unwrap();
        assert_eq!(10.0 + EPS, n(0.0));
        assert_eq!(30.0 - EPS, n(30.0));
        assert!((n(15.0) - 20.0).abs() < 1e-9);
        assert!((n(-5.0) - (5.0 + EPS)).abs() < 1e-9);
        assert!((n(40.0) - (40.0 - EPS)).abs() < 1e-9);
    }

    #[test]
    fn invariant_violations() {
        let s = sync();
        assert!(s.add_session("empty", Vec::new()).is_err());
        assert!(s
            .add_session("nan", vec![conn(f64::NAN, 1.0, true)])
            .is_err());
        assert!(s.normalize_supplemental_time("missing", 1.0).is_err());

        s.add_session("s1", vec![conn(1.0, 1.0, true)]).unwrap();
        assert!(s.normalize_supplemental_time("s1", f64::INFINITY).is_err());
        assert!(s.remove_session("s1"));
        assert!(s.normalize_supplemental_time("s1", 1.0).is_err());
    }

    #[test]
    fn config_json() {
        let mut config = replay_cache_api::config::Config::default();
        config.add_default_module_config::<TimeSyncConfig>().unwrap();
        let config: replay_cache_api::config::Config =
            serde_json::from_str(&serde_json::to_string(&config).unwrap())
                .unwrap();
        assert_eq!(
            EPS,
            config.get_module_config::<TimeSyncConfig>().unwrap().epsilon
        );

        let config: replay_cache_api::config::Config =
            serde_json::from_str(r#"{"timeSync":{}}"#).unwrap();
        assert_eq!(
            EPS,
            config.get_module_config::<TimeSyncConfig>().unwrap().epsilon
        );
    }

    fn arb_connections() -> impl Strategy<Value = Vec<Connection>> {
        prop::collection::vec(
            (-1000.0f64..1000.0, -1000.0f64..1000.0, any::<bool>()),
            1..8,
        )
        .prop_map(|v| {
            v.into_iter()
                .map(|(client, server, client_first)| {
                    conn(client, server, client_first)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn normalize_is_monotonic(
            connections in arb_connections(),
            a in -2000.0f64..2000.0,
            b in -2000.0f64..2000.0,
        ) {
            let session =
                SupplementalSession::new("p", connections, EPS).unwrap();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(session.normalize(lo) <= session.normalize(hi));
        }
    }
}
