mod common;

use common::{joined_member, map, StubOrigin, StubRemotes};
use datapod::api::StaticCredentials;
use datapod::filter::now_epoch;
use datapod::table::{Origin, OriginKind, QueryOptions, Selector};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn origin(peer: &Uuid) -> Origin {
    Origin::remote(&peer.to_string(), OriginKind::Pod, "posts")
}

#[tokio::test]
async fn test_expired_row_is_removed_without_refresh() {
    let (stores, member) = joined_member().await;
    let peer = Uuid::new_v4();
    stores
        .cache
        .append_expiring(&member, "inbox", &map(json!({"id": 1})), &origin(&peer), now_epoch() - 1.0)
        .await
        .unwrap();
    stores
        .cache
        .append(&member, "inbox", &map(json!({"id": 2})), &origin(&peer))
        .await
        .unwrap();

    let removed = stores
        .cache
        .expire_table(&member, "inbox", Some(now_epoch()))
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let rows = stores
        .router
        .query(&member, "inbox", &Selector::all(), &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].data["id"], json!(2));
}

#[tokio::test]
async fn test_append_stamps_ttl() {
    let (stores, member) = joined_member().await;
    let before = now_epoch();
    stores
        .cache
        .append(&member, "inbox", &map(json!({"id": 1})), &origin(&Uuid::new_v4()))
        .await
        .unwrap();
    let rows = stores
        .cache
        .query(&member, "inbox", &Selector::all(), &QueryOptions::default())
        .await
        .unwrap();
    let expires = rows[0].meta.expires_at.unwrap();
    assert!(expires >= before + 3600.0 - 1.0);
    assert!(expires <= now_epoch() + 3600.0 + 1.0);
}

#[tokio::test]
async fn test_refresh_deletes_rows_the_origin_no_longer_has() {
    let (stores, member) = joined_member().await;
    let peer = Uuid::new_v4();
    stores
        .cache
        .append_expiring(
            &member,
            "inbox",
            &map(json!({"id": 1, "body": "gone"})),
            &origin(&peer),
            now_epoch() + 60.0,
        )
        .await
        .unwrap();

    let stub = Arc::new(StubOrigin::with_rows(vec![]));
    let remotes = StubRemotes::default().with_origin(&peer.to_string(), stub.clone());
    let report = stores
        .cache
        .refresh_table(&member, "inbox", None, &remotes, &StaticCredentials::new("token"))
        .await
        .unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(stub.calls(), 1);
    assert_eq!(
        stores.cache.count(&member, "inbox", &Selector::all()).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_refresh_confirms_and_replaces_data() {
    let (stores, member) = joined_member().await;
    let peer = Uuid::new_v4();
    let initial_expiry = now_epoch() + 60.0;
    stores
        .cache
        .append_expiring(
            &member,
            "inbox",
            &map(json!({"id": 1, "body": "old", "likes": 1})),
            &origin(&peer),
            initial_expiry,
        )
        .await
        .unwrap();

    let stub = Arc::new(StubOrigin::with_rows(vec![map(
        json!({"id": 1, "body": "edited", "likes": 9, "posted_at": "2024-05-01T12:00:00Z"}),
    )]));
    let remotes = StubRemotes::default().with_origin(&peer.to_string(), stub);
    let report = stores
        .cache
        .refresh_table(&member, "inbox", None, &remotes, &StaticCredentials::new("token"))
        .await
        .unwrap();
    assert_eq!(report.confirmed, 1);

    let rows = stores
        .cache
        .query(&member, "inbox", &Selector::all(), &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].data["body"], json!("edited"));
    assert_eq!(rows[0].data["likes"], json!(9));
    assert!(!rows[0].data.contains_key("posted_at"));
    assert!(rows[0].meta.expires_at.unwrap() > initial_expiry);
    assert_eq!(rows[0].meta.origin_id.as_deref(), Some(peer.to_string().as_str()));
}

#[tokio::test]
async fn test_refresh_deletes_on_disagreement() {
    let (stores, member) = joined_member().await;
    let peer = Uuid::new_v4();
    stores
        .cache
        .append_expiring(&member, "inbox", &map(json!({"id": 1})), &origin(&peer), now_epoch() + 60.0)
        .await
        .unwrap();

    let stub = Arc::new(StubOrigin::with_rows(vec![
        map(json!({"id": 1, "body": "one"})),
        map(json!({"id": 1, "body": "two"})),
    ]));
    let remotes = StubRemotes::default().with_origin(&peer.to_string(), stub);
    let report = stores
        .cache
        .refresh_table(&member, "inbox", None, &remotes, &StaticCredentials::new("token"))
        .await
        .unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(
        stores.cache.count(&member, "inbox", &Selector::all()).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_refresh_deletes_when_origin_counts_a_match_without_returning_it() {
    let (stores, member) = joined_member().await;
    let peer = Uuid::new_v4();
    stores
        .cache
        .append_expiring(
            &member,
            "inbox",
            &map(json!({"id": 1, "body": "cached"})),
            &origin(&peer),
            now_epoch() + 60.0,
        )
        .await
        .unwrap();

    let stub = Arc::new(StubOrigin::with_rows(vec![map(json!({"id": 1, "body": "cached"}))]));
    stub.set_count_only(true);
    let remotes = StubRemotes::default().with_origin(&peer.to_string(), stub);
    let report = stores
        .cache
        .refresh_table(&member, "inbox", None, &remotes, &StaticCredentials::new("token"))
        .await
        .unwrap();
    assert_eq!(report.confirmed, 0);
    assert_eq!(report.deleted, 1);
    assert_eq!(
        stores.cache.count(&member, "inbox", &Selector::all()).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_unreachable_origin_defers_then_ttl_backstops() {
    let (stores, member) = joined_member().await;
    let peer = Uuid::new_v4();
    let other = Uuid::new_v4();
    stores
        .cache
        .append_expiring(&member, "inbox", &map(json!({"id": 1})), &origin(&peer), now_epoch() - 1.0)
        .await
        .unwrap();
    stores
        .cache
        .append_expiring(&member, "inbox", &map(json!({"id": 2})), &origin(&other), now_epoch() + 60.0)
        .await
        .unwrap();

    let offline = Arc::new(StubOrigin::with_rows(vec![map(json!({"id": 1}))]));
    offline.set_offline(true);
    let live = Arc::new(StubOrigin::with_rows(vec![map(json!({"id": 2}))]));
    let remotes = StubRemotes::default()
        .with_origin(&peer.to_string(), offline)
        .with_origin(&other.to_string(), live);

    let report = stores
        .cache
        .refresh_table(&member, "inbox", None, &remotes, &StaticCredentials::new("token"))
        .await
        .unwrap();
    assert_eq!(report.deferred, 1);
    assert_eq!(report.confirmed, 1);

    stores
        .cache
        .expire_table(&member, "inbox", Some(now_epoch()))
        .await
        .unwrap();
    let rows = stores
        .cache
        .query(&member, "inbox", &Selector::all(), &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].data["id"], json!(2));
}

#[tokio::test]
async fn test_rows_far_from_expiry_are_not_refreshed() {
    let (stores, member) = joined_member().await;
    let peer = Uuid::new_v4();
    stores
        .cache
        .append_expiring(
            &member,
            "inbox",
            &map(json!({"id": 1})),
            &origin(&peer),
            now_epoch() + 24.0 * 3600.0,
        )
        .await
        .unwrap();
    let stub = Arc::new(StubOrigin::with_rows(vec![]));
    let remotes = StubRemotes::default().with_origin(&peer.to_string(), stub.clone());
    let report = stores
        .cache
        .refresh_table(&member, "inbox", None, &remotes, &StaticCredentials::new("token"))
        .await
        .unwrap();
    assert_eq!(report.total(), 0);
    assert_eq!(stub.calls(), 0);
}

#[tokio::test]
async fn test_sweeper_refreshes_and_expires() {
    let (stores, member) = joined_member().await;
    let peer = Uuid::new_v4();
    stores
        .cache
        .append_expiring(&member, "inbox", &map(json!({"id": 1})), &origin(&peer), now_epoch() - 5.0)
        .await
        .unwrap();
    let stub = Arc::new(StubOrigin::with_rows(vec![]));
    stub.set_offline(true);
    let remotes = Arc::new(StubRemotes::default().with_origin(&peer.to_string(), stub));
    let sweeper = datapod::store::CacheSweeper::new(
        stores.cache.clone(),
        remotes,
        Arc::new(StaticCredentials::new("token")),
    );
    let report = sweeper.sweep_once().await;
    assert_eq!(report.refresh.deferred, 1);
    assert_eq!(report.expired, 1);
}
