//! Properties of lock identifiers and task admission.

use async_trait::async_trait;
use dirmirror_core::dn::Dn;
use dirmirror_core::monitor::ProgressMonitor;
use dirmirror_engine::lock::{LockId, LockTarget, conflicts, lock_identifiers};
use dirmirror_engine::scheduler::{Task, TaskScheduler};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn segment() -> impl Strategy<Value = String> {
    "(ou|cn|dc)=[a-z]{1,4}"
}

fn arbitrary_dn() -> impl Strategy<Value = Dn> {
    prop::collection::vec(segment(), 0..4).prop_map(|segments| {
        Dn::parse(&segments.join(",")).unwrap()
    })
}

fn target() -> impl Strategy<Value = LockTarget> {
    ("(conn1|conn2)", arbitrary_dn()).prop_map(|(conn, dn)| LockTarget::new(conn, dn))
}

proptest! {
    #[test]
    fn conflict_is_symmetric(a in target(), b in target()) {
        let a = LockId::from_target(&a);
        let b = LockId::from_target(&b);
        prop_assert_eq!(a.conflicts_with(&b), b.conflicts_with(&a));
    }

    #[test]
    fn conflict_matches_tree_relation(conn in "(conn1|conn2)", a in arbitrary_dn(), b in arbitrary_dn()) {
        let ia = LockId::from_target(&LockTarget::new(conn.clone(), a.clone()));
        let ib = LockId::from_target(&LockTarget::new(conn, b.clone()));
        let related = a.is_within(&b) || b.is_within(&a);
        prop_assert_eq!(ia.conflicts_with(&ib), related);
    }

    #[test]
    fn different_connections_never_conflict(a in arbitrary_dn(), b in arbitrary_dn()) {
        let ia = LockId::from_target(&LockTarget::new("conn1", a));
        let ib = LockId::from_target(&LockTarget::new("conn2", b));
        prop_assert!(!ia.conflicts_with(&ib));
    }
}

/// A task that checks, while running, that no concurrently running task
/// holds a conflicting lock set.
struct InvariantTask {
    targets: Vec<LockTarget>,
    running: Arc<Mutex<Vec<Vec<dirmirror_engine::lock::LockId>>>>,
}

#[async_trait]
impl Task for InvariantTask {
    fn name(&self) -> String {
        "invariant".to_string()
    }

    fn lock_targets(&self) -> Vec<LockTarget> {
        self.targets.clone()
    }

    async fn run(&self, _monitor: &ProgressMonitor) {
        let own = lock_identifiers(&self.targets);
        {
            let mut running = self.running.lock();
            for other in running.iter() {
                assert!(
                    !conflicts(other, &own),
                    "two admitted tasks hold prefix-related lock sets"
                );
            }
            running.push(own.clone());
        }

        tokio::time::sleep(Duration::from_millis(5)).await;

        self.running.lock().retain(|set| *set != own);
    }
}

#[tokio::test]
async fn admitted_tasks_are_pairwise_non_prefix() {
    let scheduler = TaskScheduler::new();
    let running = Arc::new(Mutex::new(Vec::new()));

    let dns = [
        "",
        "ou=users",
        "cn=a,ou=users",
        "cn=b,ou=users",
        "ou=groups",
        "cn=a,ou=groups",
        "cn=x,cn=a,ou=groups",
    ];

    let mut handles = Vec::new();
    for round in 0..5 {
        for (i, dn) in dns.iter().enumerate() {
            let connection = if (round + i) % 3 == 0 { "conn2" } else { "conn1" };
            let task = InvariantTask {
                targets: vec![LockTarget::new(connection, Dn::parse(dn).unwrap())],
                running: Arc::clone(&running),
            };
            handles.push(scheduler.submit(task));
        }
    }

    for handle in handles {
        let report = handle.wait().await;
        assert!(report.status.is_success(), "status: {:?}", report.status);
    }
}
