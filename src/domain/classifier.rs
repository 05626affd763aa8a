//! Status classifier: turns mysqlsh cluster-status output into a health state.
//!
//! This is the only place that pattern-matches the shell's free-form output.
//! Everything here is pure so the rules can be pinned against captured
//! output without spawning a process.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::{HealthState, InvocationResult};

/// Fragments mysqlsh prints when it cannot reach or log into a server.
const CONNECTION_ERRORS: &[&str] = &[
    "Can't connect to MySQL server",
    "Access denied for user",
    "Lost connection to MySQL server",
    "Unknown MySQL server host",
    "Connection refused",
    "MySQL server has gone away",
    "Conn error",
];

/// Cluster-level states that mean the node cannot serve the cluster.
const FAILED_STATES: &[&str] = &["OFFLINE", "ERROR", "UNREACHABLE", "NO_QUORUM"];

const DEGRADED_STATES: &[&str] = &[
    "RECOVERING",
    "RECOVERY",
    "JOINING",
    "OK_PARTIAL",
    "OK_NO_TOLERANCE",
    "OK_NO_TOLERANCE_PARTIAL",
];

const HEALTHY_STATES: &[&str] = &["OK", "ONLINE"];

pub struct StatusClassifier;

impl StatusClassifier {
    /// Health of the node at `address`, judged from a status check run on it.
    ///
    /// When the output carries the cluster topology and lists the node, the
    /// node's own member status decides. Other members only matter when the
    /// cluster as a whole has failed. Anything else falls back to the textual
    /// rules of [`StatusClassifier::classify`].
    pub fn classify_for(address: &str, result: &InvocationResult) -> HealthState {
        if result.timed_out
            || result.exit_code != Some(0)
            || has_connection_error(&result.stderr)
        {
            return HealthState::Offline;
        }

        let Some(summary) = ClusterSummary::parse(&result.stdout) else {
            return Self::classify(result);
        };
        match summary.member(address) {
            Some(_) if FAILED_STATES.contains(&summary.status.as_str()) => HealthState::Offline,
            Some(member) => member.health(),
            None => Self::classify(result),
        }
    }

    /// Classify without knowing which node produced the output.
    pub fn classify(result: &InvocationResult) -> HealthState {
        Self::classify_output(
            result.exit_code,
            result.timed_out,
            &format!("{}\n{}", result.stdout, result.stderr),
        )
    }

    /// Ordered rules, first match wins. Connection errors only count outside
    /// the status object; inside it they describe other members.
    pub fn classify_output(exit_code: Option<i32>, timed_out: bool, output: &str) -> HealthState {
        if timed_out || exit_code != Some(0) {
            return HealthState::Offline;
        }
        if outside_object(output).iter().any(|text| has_connection_error(text)) {
            return HealthState::Offline;
        }

        let states = status_values(output);
        if states.first().is_some_and(|s| FAILED_STATES.contains(s)) {
            return HealthState::Offline;
        }
        if states.iter().any(|s| DEGRADED_STATES.contains(s)) {
            return HealthState::Recovering;
        }
        if states.iter().any(|s| HEALTHY_STATES.contains(s)) {
            return HealthState::Online;
        }
        HealthState::Unknown
    }
}

fn has_connection_error(text: &str) -> bool {
    CONNECTION_ERRORS.iter().any(|e| text.contains(e))
}

/// Text before the first `{` and after the last `}`.
fn outside_object(output: &str) -> [&str; 2] {
    match (output.find('{'), output.rfind('}')) {
        (Some(start), Some(end)) if start < end => [&output[..start], &output[end + 1..]],
        _ => [output, ""],
    }
}

/// Values of every `"status"` key, in order of appearance.
///
/// A lexical scan rather than a JSON parse: mysqlsh may surround the object
/// with warnings, and callers may hand over fragments.
pub fn status_values(output: &str) -> Vec<&str> {
    const KEY: &str = "\"status\"";

    let mut values = Vec::new();
    let mut rest = output;
    while let Some(pos) = rest.find(KEY) {
        rest = &rest[pos + KEY.len()..];
        let Some(after_colon) = rest.trim_start().strip_prefix(':') else {
            continue;
        };
        let Some(body) = after_colon.trim_start().strip_prefix('"') else {
            continue;
        };
        if let Some(end) = body.find('"') {
            values.push(&body[..end]);
            rest = &body[end + 1..];
        }
    }
    values
}

// ── Structured status ──────────────────────────────────────

/// Cluster-wide view reported by `dba.getCluster().status()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub cluster_name: String,
    pub status: String,
    pub status_text: String,
    pub topology_mode: String,
    pub primary: Option<String>,
    pub members: Vec<MemberStatus>,
}

/// One topology entry of the cluster status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberStatus {
    pub address: String,
    pub role: String,
    pub mode: String,
    pub status: String,
    pub replication_lag: Option<String>,
    pub version: Option<String>,
    pub shell_connect_error: Option<String>,
    pub instance_errors: Vec<String>,
}

impl MemberStatus {
    pub fn is_primary(&self) -> bool {
        self.role.eq_ignore_ascii_case("PRIMARY")
    }

    /// Color of this member's own status, independent of the cluster.
    pub fn health(&self) -> HealthState {
        match self.status.to_ascii_uppercase().as_str() {
            "ONLINE" => HealthState::Online,
            "RECOVERING" | "RECOVERY" | "JOINING" => HealthState::Recovering,
            _ => HealthState::Offline,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatus {
    #[serde(default)]
    cluster_name: Option<String>,
    default_replica_set: RawReplicaSet,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReplicaSet {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    status_text: Option<String>,
    #[serde(default)]
    topology_mode: Option<String>,
    #[serde(default)]
    primary: Option<String>,
    #[serde(default)]
    topology: BTreeMap<String, RawMember>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMember {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    member_role: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    replication_lag: Option<serde_json::Value>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    shell_connect_error: Option<String>,
    #[serde(default)]
    instance_errors: Vec<String>,
}

impl ClusterSummary {
    /// Parse the JSON object spanning the first `{` to the last `}`.
    pub fn parse(output: &str) -> Option<Self> {
        let start = output.find('{')?;
        let end = output.rfind('}')?;
        if end < start {
            return None;
        }
        let raw: RawStatus = serde_json::from_str(&output[start..=end]).ok()?;
        let rs = raw.default_replica_set;

        let members = rs
            .topology
            .into_iter()
            .map(|(key, m)| MemberStatus {
                address: m.address.unwrap_or(key),
                role: m.member_role.unwrap_or_else(|| "?".into()),
                mode: m.mode.unwrap_or_else(|| "?".into()),
                status: m.status.unwrap_or_else(|| "?".into()),
                replication_lag: m.replication_lag.and_then(|v| match v {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                }),
                version: m.version,
                shell_connect_error: m.shell_connect_error,
                instance_errors: m.instance_errors,
            })
            .collect();

        Some(Self {
            cluster_name: raw.cluster_name.unwrap_or_else(|| "N/A".into()),
            status: rs.status.unwrap_or_else(|| "N/A".into()),
            status_text: rs.status_text.unwrap_or_else(|| "N/A".into()),
            topology_mode: rs.topology_mode.unwrap_or_else(|| "N/A".into()),
            primary: rs.primary,
            members,
        })
    }

    pub fn member(&self, address: &str) -> Option<&MemberStatus> {
        self.members
            .iter()
            .find(|m| m.address.eq_ignore_ascii_case(address))
    }

    pub fn member_addresses(&self) -> Vec<String> {
        self.members.iter().map(|m| m.address.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEALTHY: &str = r#"{
    "clusterName": "prodCluster",
    "defaultReplicaSet": {
        "name": "default",
        "primary": "db1:3306",
        "ssl": "REQUIRED",
        "status": "OK",
        "statusText": "Cluster is ONLINE and can tolerate up to ONE failure.",
        "topology": {
            "db1:3306": {
                "address": "db1:3306",
                "memberRole": "PRIMARY",
                "mode": "R/W",
                "readReplicas": {},
                "replicationLag": "applier_queue_applied",
                "role": "HA",
                "status": "ONLINE",
                "version": "8.0.36"
            },
            "db2:3306": {
                "address": "db2:3306",
                "memberRole": "SECONDARY",
                "mode": "R/O",
                "readReplicas": {},
                "replicationLag": null,
                "role": "HA",
                "status": "ONLINE",
                "version": "8.0.36"
            },
            "db3:3306": {
                "address": "db3:3306",
                "memberRole": "SECONDARY",
                "mode": "R/O",
                "readReplicas": {},
                "replicationLag": null,
                "role": "HA",
                "status": "ONLINE",
                "version": "8.0.36"
            }
        },
        "topologyMode": "Single-Primary"
    },
    "groupInformationSourceMember": "db1:3306"
}"#;

    const RECOVERING: &str = r#"{"clusterName":"prodCluster","defaultReplicaSet":{"name":"default","primary":"db1:3306","status":"OK_NO_TOLERANCE","statusText":"Cluster is NOT tolerant to any failures. 1 member is not active.","topology":{"db1:3306":{"address":"db1:3306","memberRole":"PRIMARY","mode":"R/W","status":"ONLINE"},"db2:3306":{"address":"db2:3306","memberRole":"SECONDARY","mode":"R/O","status":"RECOVERING","instanceErrors":["NOTE: distributed recovery in progress"]}},"topologyMode":"Single-Primary"}}"#;

    /// One member down: mysqlsh still exits 0 and reports the peer's
    /// connection error inside the topology.
    const MISSING_MEMBER: &str = r#"{
    "clusterName": "prodCluster",
    "defaultReplicaSet": {
        "name": "default",
        "primary": "db1:3306",
        "ssl": "REQUIRED",
        "status": "OK_NO_TOLERANCE_PARTIAL",
        "statusText": "Cluster is NOT tolerant to any failures. 1 member is not active.",
        "topology": {
            "db1:3306": {
                "address": "db1:3306",
                "memberRole": "PRIMARY",
                "mode": "R/W",
                "readReplicas": {},
                "role": "HA",
                "status": "ONLINE",
                "version": "8.0.36"
            },
            "db2:3306": {
                "address": "db2:3306",
                "memberRole": "SECONDARY",
                "mode": "R/O",
                "readReplicas": {},
                "role": "HA",
                "status": "ONLINE",
                "version": "8.0.36"
            },
            "db3:3306": {
                "address": "db3:3306",
                "instanceErrors": [
                    "NOTE: group_replication is stopped."
                ],
                "memberRole": "SECONDARY",
                "mode": "n/a",
                "readReplicas": {},
                "role": "HA",
                "shellConnectError": "MySQL Error 2003 (HY000): Can't connect to MySQL server on 'db3:3306' (111)",
                "status": "(MISSING)"
            }
        },
        "topologyMode": "Single-Primary"
    },
    "groupInformationSourceMember": "db1:3306"
}"#;

    fn ok(stdout: &str) -> InvocationResult {
        let now = chrono::Utc::now();
        InvocationResult {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
            started_at: now,
            finished_at: now,
            elapsed_ms: 0,
            timed_out: false,
        }
    }

    fn run(exit_code: i32, stdout: &str) -> HealthState {
        StatusClassifier::classify_output(Some(exit_code), false, stdout)
    }

    #[test]
    fn ok_marker_with_clean_exit_is_online() {
        assert_eq!(run(0, r#""status": "OK""#), HealthState::Online);
        assert_eq!(run(0, HEALTHY), HealthState::Online);
    }

    #[test]
    fn connection_failure_is_offline() {
        let out = "MySQL Error 2003 (HY000): Can't connect to MySQL server on 'db9:3306' (111)";
        assert_eq!(run(1, out), HealthState::Offline);
        // The fragment alone is enough, whatever the exit code says.
        assert_eq!(run(0, out), HealthState::Offline);
    }

    #[test]
    fn timeout_wins_over_everything() {
        for exit in [None, Some(0), Some(1)] {
            for text in ["", HEALTHY, RECOVERING, "garbage"] {
                assert_eq!(
                    StatusClassifier::classify_output(exit, true, text),
                    HealthState::Offline
                );
            }
        }
    }

    #[test]
    fn degraded_topology_is_recovering() {
        assert_eq!(run(0, RECOVERING), HealthState::Recovering);
        assert_eq!(run(0, r#"{"status":"OK_PARTIAL"}"#), HealthState::Recovering);
    }

    #[test]
    fn failed_cluster_status_is_offline() {
        let no_quorum = r#"{"status": "NO_QUORUM", "topology": {"a": {"status": "ONLINE"}}}"#;
        assert_eq!(run(0, no_quorum), HealthState::Offline);
        // A member being unreachable does not fail the whole cluster.
        let partial = r#"{"status": "OK_PARTIAL", "topology": {"a": {"status": "UNREACHABLE"}}}"#;
        assert_eq!(run(0, partial), HealthState::Recovering);
    }

    #[test]
    fn unparseable_output_is_unknown() {
        assert_eq!(run(0, ""), HealthState::Unknown);
        assert_eq!(run(0, "hello from mysqlsh"), HealthState::Unknown);
        assert_eq!(run(0, r#"{"status": 42}"#), HealthState::Unknown);
    }

    #[test]
    fn nonzero_exit_is_offline() {
        assert_eq!(run(1, HEALTHY), HealthState::Offline);
        assert_eq!(
            StatusClassifier::classify_output(None, false, HEALTHY),
            HealthState::Offline
        );
    }

    #[test]
    fn classification_is_idempotent() {
        for text in [HEALTHY, RECOVERING, "", "Access denied for user 'root'@'x'"] {
            assert_eq!(run(0, text), run(0, text));
        }
    }

    #[test]
    fn classify_reads_both_streams() {
        let now = chrono::Utc::now();
        let result = InvocationResult {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: "Conn error: timeout".into(),
            started_at: now,
            finished_at: now,
            elapsed_ms: 0,
            timed_out: false,
        };
        assert_eq!(StatusClassifier::classify(&result), HealthState::Offline);
    }

    #[test]
    fn missing_peer_does_not_take_down_healthy_nodes() {
        let result = ok(MISSING_MEMBER);
        assert_eq!(StatusClassifier::classify_for("db1:3306", &result), HealthState::Online);
        assert_eq!(StatusClassifier::classify_for("db2:3306", &result), HealthState::Online);
        assert_eq!(StatusClassifier::classify_for("db3:3306", &result), HealthState::Offline);
    }

    #[test]
    fn peer_connection_errors_inside_the_object_are_ignored() {
        // Without a node to look up, the cluster-level verdict applies.
        assert_eq!(run(0, MISSING_MEMBER), HealthState::Recovering);

        let warned = format!("{}\nConn error: lost session", MISSING_MEMBER);
        assert_eq!(run(0, &warned), HealthState::Offline);
    }

    #[test]
    fn recovering_peer_leaves_online_node_online() {
        let result = ok(RECOVERING);
        assert_eq!(StatusClassifier::classify_for("db1:3306", &result), HealthState::Online);
        assert_eq!(
            StatusClassifier::classify_for("db2:3306", &result),
            HealthState::Recovering
        );
    }

    #[test]
    fn own_status_yields_to_failed_cluster() {
        let no_quorum = r#"{"clusterName":"c","defaultReplicaSet":{"status":"NO_QUORUM","topology":{"db1:3306":{"status":"ONLINE"}}}}"#;
        assert_eq!(
            StatusClassifier::classify_for("db1:3306", &ok(no_quorum)),
            HealthState::Offline
        );
    }

    #[test]
    fn unlisted_node_falls_back_to_text_rules() {
        assert_eq!(StatusClassifier::classify_for("db9:3306", &ok(HEALTHY)), HealthState::Online);
        assert_eq!(
            StatusClassifier::classify_for("db9:3306", &ok("hello from mysqlsh")),
            HealthState::Unknown
        );

        let mut refused = ok(HEALTHY);
        refused.stderr = "Conn error: Connection refused".into();
        assert_eq!(StatusClassifier::classify_for("db1:3306", &refused), HealthState::Offline);

        let mut failed = ok(HEALTHY);
        failed.exit_code = Some(1);
        assert_eq!(StatusClassifier::classify_for("db1:3306", &failed), HealthState::Offline);
    }

    #[test]
    fn status_values_handles_spacing_and_fragments() {
        assert_eq!(status_values(r#""status":"OK""#), vec!["OK"]);
        assert_eq!(status_values("\"status\" :\n  \"ONLINE\""), vec!["ONLINE"]);
        assert_eq!(status_values(r#""status": null, "status": "X""#), vec!["X"]);
        assert!(status_values(r#""status": "unterminated"#).is_empty());
    }

    #[test]
    fn summary_parses_topology() {
        let output = format!(
            "WARNING: Using a password on the command line interface can be insecure.\n{}",
            HEALTHY
        );
        let summary = ClusterSummary::parse(&output).unwrap();
        assert_eq!(summary.cluster_name, "prodCluster");
        assert_eq!(summary.status, "OK");
        assert_eq!(summary.topology_mode, "Single-Primary");
        assert_eq!(summary.primary.as_deref(), Some("db1:3306"));
        assert_eq!(summary.member_addresses(), vec!["db1:3306", "db2:3306", "db3:3306"]);

        let primary = &summary.members[0];
        assert!(primary.is_primary());
        assert_eq!(primary.replication_lag.as_deref(), Some("applier_queue_applied"));
        assert_eq!(summary.members[1].replication_lag, None);
    }

    #[test]
    fn summary_keeps_member_errors() {
        let summary = ClusterSummary::parse(RECOVERING).unwrap();
        let db2 = summary.members.iter().find(|m| m.address == "db2:3306").unwrap();
        assert_eq!(db2.health(), HealthState::Recovering);
        assert_eq!(db2.instance_errors.len(), 1);
        assert_eq!(db2.version, None);
    }

    #[test]
    fn summary_rejects_non_status_output() {
        assert!(ClusterSummary::parse("no braces here").is_none());
        assert!(ClusterSummary::parse(r#"{"clusterName": "x"}"#).is_none());
        assert!(ClusterSummary::parse("} backwards {").is_none());
    }
}
