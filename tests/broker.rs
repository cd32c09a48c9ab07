mod common;

use bytes::Bytes;
use std::time::Duration;

use common::{eventually, Harness};
use starlight_lib::peer::{SdpKind, SessionDescription};
use starlight_lib::{BrokerError, BrokerEvent, Details, SessionState};

#[tokio::test]
async fn offers_get_distinct_sessions() {
    let mut h = Harness::new();
    let (a, _ra) = h.offer().await;
    let (b, _rb) = h.offer().await;

    assert_ne!(a, b);
    assert_eq!(h.broker.table().len(), 2);
    assert_eq!(h.broker.table().get(&a).unwrap().state, SessionState::Offering);
}

#[tokio::test]
async fn offer_is_a_complete_description() {
    let h = Harness::new();
    let offer = h.broker.create_offer(Details::Null).await.unwrap();
    assert_eq!(offer.offer.kind, SdpKind::Offer);
    assert!(offer.offer.sdp.starts_with("v=0"));
}

#[tokio::test]
async fn failed_offer_leaves_no_session() {
    let h = Harness::new();
    h.connector.fail_offers(true);

    let err = h.broker.create_offer(Details::Null).await.unwrap_err();
    assert!(matches!(err, BrokerError::Negotiation(_)));
    assert!(h.broker.table().is_empty());
}

#[tokio::test]
async fn answer_for_unknown_session_changes_nothing() {
    let mut h = Harness::new();
    let (id, _remote) = h.offer().await;

    let err = h
        .broker
        .handle_answer("no-such-session", SessionDescription::answer("v=0"))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::UnknownSession(ref s) if s == "no-such-session"));
    assert_eq!(h.broker.table().ids(), vec![id]);
}

#[tokio::test]
async fn answer_moves_offering_to_answering() {
    let mut h = Harness::new();
    let (id, remote) = h.offer().await;

    h.broker
        .handle_answer(&id, SessionDescription::answer("v=0 answer"))
        .await
        .unwrap();

    assert_eq!(h.broker.table().get(&id).unwrap().state, SessionState::Answering);
    assert_eq!(remote.answers(), vec![SessionDescription::answer("v=0 answer")]);
}

#[tokio::test]
async fn duplicate_answer_is_ignored() {
    let mut h = Harness::new();
    let (id, remote) = h.offer().await;
    let answer = SessionDescription::answer("v=0");

    h.broker.handle_answer(&id, answer.clone()).await.unwrap();
    h.broker.handle_answer(&id, answer).await.unwrap();

    assert_eq!(remote.answers().len(), 1);
    assert_eq!(h.broker.table().get(&id).unwrap().state, SessionState::Answering);
}

#[tokio::test]
async fn concurrent_duplicate_answers_keep_session() {
    let mut h = Harness::new();
    h.connector.answer_delay(Duration::from_millis(20));
    let (id, remote) = h.offer().await;
    let answer = SessionDescription::answer("v=0");

    let (first, second) = tokio::join!(
        h.broker.handle_answer(&id, answer.clone()),
        h.broker.handle_answer(&id, answer.clone()),
    );

    assert!(first.is_ok() && second.is_ok());
    assert_eq!(remote.answers().len(), 1);
    assert_eq!(h.broker.table().get(&id).unwrap().state, SessionState::Answering);
    assert!(!remote.is_destroyed());

    remote.open();
    assert!(matches!(h.next_event().await, BrokerEvent::Opened { .. }));
}

#[tokio::test]
async fn open_while_answer_is_applied_connects() {
    let mut h = Harness::new();
    h.connector.answer_delay(Duration::from_millis(100));
    let (id, remote) = h.offer().await;

    let broker = h.broker.clone();
    let answering = {
        let id = id.clone();
        tokio::spawn(async move {
            broker
                .handle_answer(&id, SessionDescription::answer("v=0"))
                .await
        })
    };
    eventually(|| {
        h.broker
            .table()
            .get(&id)
            .map(|s| s.state == SessionState::Answering)
            .unwrap_or(false)
    })
    .await;
    remote.open();

    assert!(matches!(h.next_event().await, BrokerEvent::Opened { .. }));
    answering.await.unwrap().unwrap();
    assert_eq!(h.broker.table().get(&id).unwrap().state, SessionState::Connected);
}

#[tokio::test]
async fn rejected_answer_removes_session() {
    let mut h = Harness::new();
    h.connector.reject_answers(true);
    let (id, remote) = h.offer().await;

    let err = h
        .broker
        .handle_answer(&id, SessionDescription::answer("garbage"))
        .await
        .unwrap_err();

    assert!(matches!(err, BrokerError::Negotiation(_)));
    assert!(!h.broker.table().contains(&id));
    assert!(remote.is_destroyed());
    h.assert_quiet().await;
}

#[tokio::test]
async fn answer_for_connected_session_is_invalid() {
    let mut h = Harness::new();
    let (id, _remote) = h.connected().await;

    let err = h
        .broker
        .handle_answer(&id, SessionDescription::answer("v=0"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BrokerError::InvalidState {
            state: SessionState::Connected,
            ..
        }
    ));
    assert_eq!(h.broker.table().get(&id).unwrap().state, SessionState::Connected);
}

#[tokio::test]
async fn messages_follow_open_in_order() {
    let mut h = Harness::new();
    let (id, remote) = h.connected().await;

    for chunk in ["one", "two", "three"] {
        remote.deliver(chunk);
    }

    for expected in ["one", "two", "three"] {
        match h.next_event().await {
            BrokerEvent::Message {
                session_id,
                payload,
                ..
            } => {
                assert_eq!(session_id, id);
                assert_eq!(payload, Bytes::from(expected));
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn data_before_open_is_dropped() {
    let mut h = Harness::new();
    let (id, remote) = h.offer().await;
    h.broker
        .handle_answer(&id, SessionDescription::answer("v=0"))
        .await
        .unwrap();

    remote.deliver("early");
    remote.open();
    remote.deliver("late");

    assert!(matches!(h.next_event().await, BrokerEvent::Opened { .. }));
    match h.next_event().await {
        BrokerEvent::Message { payload, .. } => assert_eq!(payload, Bytes::from("late")),
        other => panic!("expected Message, got {other:?}"),
    }
    h.assert_quiet().await;
}

#[tokio::test]
async fn details_reach_every_event() {
    let mut h = Harness::new();
    let details = serde_json::json!({"viewer": "desk-1"});
    let offer = h.broker.create_offer(details.clone()).await.unwrap();
    let remote = h.remotes.recv().await.unwrap();
    h.broker
        .handle_answer(&offer.session_id, SessionDescription::answer("v=0"))
        .await
        .unwrap();

    remote.open();
    remote.close();

    match h.next_event().await {
        BrokerEvent::Opened { details: d, .. } => assert_eq!(d, details),
        other => panic!("expected Opened, got {other:?}"),
    }
    match h.next_event().await {
        BrokerEvent::Closed { details: d, .. } => assert_eq!(d, details),
        other => panic!("expected Closed, got {other:?}"),
    }
}

#[tokio::test]
async fn remote_close_fires_closed_once() {
    let mut h = Harness::new();
    let (id, remote) = h.connected().await;

    remote.close();
    remote.close();

    match h.next_event().await {
        BrokerEvent::Closed { session_id, .. } => assert_eq!(session_id, id),
        other => panic!("expected Closed, got {other:?}"),
    }
    h.assert_quiet().await;
    assert!(!h.broker.table().contains(&id));
    assert!(remote.is_destroyed());
    assert!(!h.broker.close(&id).await);
}

#[tokio::test]
async fn transport_error_fires_error_once() {
    let mut h = Harness::new();
    let (id, remote) = h.connected().await;

    remote.fail("ice failure");
    remote.close();

    match h.next_event().await {
        BrokerEvent::Error {
            session_id, error, ..
        } => {
            assert_eq!(session_id, id);
            assert!(matches!(*error, BrokerError::Transport(_)));
        }
        other => panic!("expected Error, got {other:?}"),
    }
    h.assert_quiet().await;
    assert!(h.broker.table().is_empty());
}

#[tokio::test]
async fn racing_teardowns_report_one_outcome() {
    let mut h = Harness::new();
    let (id, remote) = h.connected().await;

    remote.close();
    let failed = h
        .broker
        .fail(&id, BrokerError::Socket(std::io::ErrorKind::BrokenPipe.into()));
    let closed = h.broker.close(&id);
    let (failed, closed) = tokio::join!(failed, closed);

    // at most one of the local calls won; the remote close may have won instead
    assert!(!(failed && closed));
    let terminal = h.next_event().await;
    assert!(matches!(
        terminal,
        BrokerEvent::Closed { .. } | BrokerEvent::Error { .. }
    ));
    h.assert_quiet().await;
}

#[tokio::test]
async fn teardown_before_open_is_silent() {
    let mut h = Harness::new();
    let (id, remote) = h.offer().await;
    h.broker
        .handle_answer(&id, SessionDescription::answer("v=0"))
        .await
        .unwrap();

    remote.fail("dtls handshake failed");

    eventually(|| !h.broker.table().contains(&id)).await;
    assert!(remote.is_destroyed());
    h.assert_quiet().await;
}

#[tokio::test]
async fn stalled_negotiation_times_out() {
    let mut h = Harness::with_timeout(Duration::from_millis(100));
    let (offering, r1) = h.offer().await;
    let (answering, r2) = h.offer().await;
    h.broker
        .handle_answer(&answering, SessionDescription::answer("v=0"))
        .await
        .unwrap();

    eventually(|| h.broker.table().is_empty()).await;
    assert!(r1.is_destroyed() && r2.is_destroyed());
    h.assert_quiet().await;

    let err = h
        .broker
        .handle_answer(&offering, SessionDescription::answer("v=0"))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::UnknownSession(_)));
}

#[tokio::test]
async fn connected_session_outlives_negotiation_timeout() {
    let mut h = Harness::with_timeout(Duration::from_millis(100));
    let (id, _remote) = h.connected().await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(h.broker.table().contains(&id));
    h.assert_quiet().await;
}

#[tokio::test]
async fn send_reaches_connected_peer_only() {
    let mut h = Harness::new();
    let (id, remote) = h.connected().await;
    let (pending, _pending_remote) = h.offer().await;

    h.broker.send(&id, Bytes::from("ping")).await.unwrap();
    assert_eq!(remote.recv_sent().await.unwrap(), Bytes::from("ping"));

    let err = h.broker.send(&pending, Bytes::from("ping")).await.unwrap_err();
    assert!(matches!(err, BrokerError::InvalidState { .. }));
    let err = h.broker.send("gone", Bytes::from("ping")).await.unwrap_err();
    assert!(matches!(err, BrokerError::UnknownSession(_)));
}

#[tokio::test]
async fn send_to_all_skips_unopened_sessions() {
    let mut h = Harness::new();
    let (_a, ra) = h.connected().await;
    let (_b, rb) = h.connected().await;
    let (_c, _rc) = h.offer().await;

    assert_eq!(h.broker.send_to_all(Bytes::from("all")).await, 2);
    assert_eq!(ra.recv_sent().await.unwrap(), Bytes::from("all"));
    assert_eq!(rb.recv_sent().await.unwrap(), Bytes::from("all"));
}

#[tokio::test]
async fn close_is_idempotent() {
    let mut h = Harness::new();
    let (id, _remote) = h.connected().await;

    assert!(h.broker.close(&id).await);
    assert!(!h.broker.close(&id).await);
    assert!(matches!(h.next_event().await, BrokerEvent::Closed { .. }));
    h.assert_quiet().await;
}

#[tokio::test]
async fn close_all_is_best_effort_over_every_session() {
    let mut h = Harness::new();
    let (_a, ra) = h.connected().await;
    let (_b, rb) = h.connected().await;
    let (_c, rc) = h.offer().await;

    assert_eq!(h.broker.close_all().await, 3);
    assert!(h.broker.table().is_empty());
    assert!(ra.is_destroyed() && rb.is_destroyed() && rc.is_destroyed());

    // only the two opened sessions report a close
    for _ in 0..2 {
        assert!(matches!(h.next_event().await, BrokerEvent::Closed { .. }));
    }
    h.assert_quiet().await;
    assert_eq!(h.broker.close_all().await, 0);
}

#[tokio::test]
async fn removed_ids_are_never_reissued() {
    let mut h = Harness::new();
    let (first, _r) = h.offer().await;
    assert!(h.broker.close(&first).await);

    for _ in 0..20 {
        let (id, _remote) = h.offer().await;
        assert_ne!(id, first);
    }
}
