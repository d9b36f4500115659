use admin::{exit_codes, AdminService};
use coordinator::HintedHandoff;
use placement::{ReplicaConfig, StrategyKind};
use ring::{DomainPartitioner, Token};
use std::sync::Arc;
use test_support::TestCluster;
use topology::RingController;

const TABLE: &str = "events";

fn service(cluster: &TestCluster) -> AdminService {
    let ctx = cluster.context(
        0,
        Arc::new(DomainPartitioner),
        &[ReplicaConfig {
            table: TABLE.to_string(),
            replication_factor: 2,
            strategy: StrategyKind::Simple,
        }],
    );
    ctx.metadata
        .update_normal_token(Token::from("20"), cluster.endpoint(0));
    ctx.metadata
        .update_normal_token(Token::from("80"), cluster.endpoint(1));
    ctx.metadata
        .update_normal_token(Token::from("e0"), cluster.endpoint(2));

    let hints = HintedHandoff::new(ctx.clone()).unwrap();
    let controller = RingController::new(ctx.clone(), hints.clone()).unwrap();
    AdminService::new(ctx, controller, hints)
}

#[tokio::test]
async fn ring_view_reports_owners_and_ownership() {
    let cluster = TestCluster::new(3);
    let service = service(&cluster);

    let view = service.ring_view();
    assert_eq!(view.len(), 3);
    assert_eq!(view[0].token, Token::from("20"));
    assert_eq!(view[0].endpoint, cluster.endpoint(0));
    assert!(view.iter().all(|entry| entry.alive));

    let total: f64 = view.iter().map(|entry| entry.ownership).sum();
    assert!((total - 1.0).abs() < 1e-9);

    cluster.failures.set_alive(cluster.endpoint(2), false);
    assert!(!service.ring_view()[2].alive);
}

#[tokio::test]
async fn node_info_names_mode_token_and_backlog() {
    let cluster = TestCluster::new(3);
    let service = service(&cluster);

    let info = service.node_info();
    assert_eq!(info.endpoint, cluster.endpoint(0));
    assert_eq!(info.token, Some(Token::from("20")));
    assert_eq!(info.mode, "starting");
    assert_eq!(info.generation, 1);
    assert!(info.hint_backlog.is_empty());
}

#[tokio::test]
async fn flush_and_compact_reach_the_store() {
    let cluster = TestCluster::new(3);
    let service = service(&cluster);

    service.flush(TABLE).await.unwrap();
    service.compact(TABLE).await.unwrap();
    assert_eq!(
        cluster.store(0).flushed(),
        vec![TABLE.to_string(), TABLE.to_string()]
    );

    assert!(service.flush("missing-table").await.is_err());
}

#[test]
fn exit_codes_are_the_operator_contract() {
    assert_eq!(exit_codes::SUCCESS, 0);
    assert_eq!(exit_codes::USAGE, 1);
    assert_eq!(exit_codes::CONNECTION, 3);
}
