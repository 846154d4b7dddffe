//! End-to-end reservation scenarios: admission, push, capacity, cookies,
//! deletion ordering, pause/resume, and the mirror lifecycle.

mod support;

use support::*;

use tegu_controller::agents::AgentRequest;
use tegu_controller::reservation::{ResError, ResRequest};
use tegu_controller::unix_now;
use tegu_pledge::{MirrorOutput, MirrorPledge, Pledge, SteerPledge};
use tokio::sync::oneshot;

#[tokio::test]
async fn happy_reserve_pushes_full_flowmod_set() {
    let mut bed = spawn_bed(line_topo()).await;
    let now = unix_now();

    bed.add(TestBed::bandwidth(
        "r1",
        "alice",
        100_000_000 / 8,
        50_000_000 / 8,
        now + 10,
        now + 70,
    ))
    .await
    .unwrap();

    // commences within the 15s lead window, so the first tick pushes it
    bed.push_tick().await;
    let reqs = bed.drain_agent().await;
    let fmods = flowmod_strings(&reqs);

    // two links: per direction one endpoint, one ingress/egress, one
    // intermediate = 2 * (links + 1) requests
    assert_eq!(fmods.len(), 6, "fmods: {fmods:#?}");
    assert!(fmods.iter().all(|f| f.contains("add 0xbeef br-int")));
    assert!(fmods.iter().any(|f| f.contains("-s 10.0.0.1 -d 10.0.0.2")));
    assert!(fmods.iter().any(|f| f.contains("-s 10.0.0.2 -d 10.0.0.1")));

    // a second tick must not re-push
    bed.push_tick().await;
    assert!(flowmod_strings(&bed.drain_agent().await).is_empty());

    // the listing carries the pledge with its state
    let listing = bed.list().await;
    assert!(listing.contains("\"r1\""));
    assert!(listing.contains("PENDING"));
}

#[tokio::test]
async fn capacity_rejection_for_overlapping_windows() {
    let bed = spawn_bed(line_topo()).await;
    let now = unix_now();
    let big = 700_000_000 / 8; // 700 Mbit/s on a 1 Gbit/s fabric

    bed.add(TestBed::bandwidth("r1", "alice", big, 0, now + 10, now + 300))
        .await
        .unwrap();

    let err = bed
        .add(TestBed::bandwidth("r2", "alice", big, 0, now + 50, now + 200))
        .await
        .unwrap_err();
    assert!(matches!(err, ResError::CannotReserve(_)), "got {err:?}");

    // a disjoint window still fits
    bed.add(TestBed::bandwidth("r3", "alice", big, 0, now + 400, now + 500))
        .await
        .unwrap();
}

#[tokio::test]
async fn duplicate_id_conflicts() {
    let bed = spawn_bed(line_topo()).await;
    let now = unix_now();
    bed.add(TestBed::bandwidth("r1", "alice", 1000, 0, now + 10, now + 70))
        .await
        .unwrap();
    let err = bed
        .add(TestBed::bandwidth("r1", "alice", 1000, 0, now + 10, now + 70))
        .await
        .unwrap_err();
    assert!(matches!(err, ResError::Conflict(_)));
}

#[tokio::test]
async fn cookie_mismatch_is_rejected_and_pledge_survives() {
    let bed = spawn_bed(line_topo()).await;
    let now = unix_now();
    bed.add(TestBed::bandwidth("r1", "alice", 1000, 0, now + 10, now + 70))
        .await
        .unwrap();

    let err = bed.del("r1", "bob").await.unwrap_err();
    assert!(matches!(err, ResError::Unauthorized));
    assert!(bed.get("r1", "alice").await.is_ok());

    // the super cookie opens every pledge
    assert!(bed.get("r1", "admin").await.is_ok());
    bed.del("r1", "admin").await.unwrap();
}

#[tokio::test]
async fn delete_releases_capacity_before_expiry_rewrite() {
    let bed = spawn_bed(line_topo()).await;
    let now = unix_now();
    let big = 700_000_000 / 8;

    bed.add(TestBed::bandwidth("r1", "alice", big, 0, now + 10, now + 300))
        .await
        .unwrap();
    bed.del("r1", "alice").await.unwrap();

    // the same capacity is admissible again immediately after the delete,
    // so the release must have happened
    bed.add(TestBed::bandwidth("r2", "bob", big, 0, now + 50, now + 200))
        .await
        .unwrap();

    // and the deleted pledge now expires in the linger window
    let p = bed.get("r1", "alice").await.unwrap();
    let expiry = p.window().expiry;
    assert!(expiry <= unix_now() + 15, "expiry {expiry} too far out");
}

#[tokio::test]
async fn pause_withdraws_and_resume_restores() {
    let mut bed = spawn_bed(line_topo()).await;
    let now = unix_now();

    bed.add(TestBed::bandwidth("r1", "alice", 1000, 500, now + 5, now + 600))
        .await
        .unwrap();
    bed.push_tick().await;
    let first = flowmod_strings(&bed.drain_agent().await);
    assert!(!first.is_empty());
    assert!(first.iter().all(|f| fmod_timeout(f) > 60));

    bed.res.send(ResRequest::Pause).await.unwrap();
    bed.push_tick().await;
    let paused = flowmod_strings(&bed.drain_agent().await);
    assert!(!paused.is_empty(), "pause must re-emit with short expiry");
    assert!(paused.iter().all(|f| fmod_timeout(f) <= 15));

    bed.res.send(ResRequest::Resume).await.unwrap();
    bed.push_tick().await;
    let resumed = flowmod_strings(&bed.drain_agent().await);
    assert!(!resumed.is_empty());
    assert!(resumed.iter().all(|f| fmod_timeout(f) > 60));
}

#[tokio::test]
async fn push_failure_clears_pushed_for_retry() {
    let mut bed = spawn_bed(line_topo()).await;
    let now = unix_now();

    bed.add(TestBed::bandwidth("r1", "alice", 1000, 0, now + 5, now + 600))
        .await
        .unwrap();
    bed.push_tick().await;
    assert!(!flowmod_strings(&bed.drain_agent().await).is_empty());

    bed.res
        .send(ResRequest::PushFailed { id: "r1".into() })
        .await
        .unwrap();
    bed.push_tick().await;
    assert!(
        !flowmod_strings(&bed.drain_agent().await).is_empty(),
        "retry tick must re-emit after a failed push"
    );
}

#[tokio::test]
async fn mirror_lifecycle_add_then_delete() {
    let mut bed = spawn_bed(line_topo()).await;
    let now = unix_now();

    let mirror = MirrorPledge::new(
        None,
        "alice",
        vec!["fa:16:3e:5f:df:60".into()],
        MirrorOutput::parse("10.0.0.5").unwrap(),
        vec![],
        "phys1",
        now,
        now + 3600,
        now,
    )
    .unwrap();
    let name = mirror.id.clone();
    assert!(name.starts_with("mir-"));

    bed.add(Pledge::Mirror(mirror)).await.unwrap();
    bed.push_tick().await;

    let reqs = bed.drain_agent().await;
    let long: Vec<&String> = reqs
        .iter()
        .filter_map(|r| match r {
            AgentRequest::SendLong(m) => Some(m),
            _ => None,
        })
        .collect();
    assert_eq!(long.len(), 1);
    assert!(long[0].contains(r#""atype":"mirrorwiz""#));
    assert!(long[0].contains(&format!("add {name}")));

    // delete emits the teardown immediately
    bed.del(&name, "alice").await.unwrap();
    let reqs = bed.drain_agent().await;
    let long: Vec<&String> = reqs
        .iter()
        .filter_map(|r| match r {
            AgentRequest::SendLong(m) => Some(m),
            _ => None,
        })
        .collect();
    assert_eq!(long.len(), 1);
    assert!(long[0].contains(&format!("del {name}")));
}

#[tokio::test]
async fn steering_chain_emits_one_fmod_per_hop() {
    let mut bed = spawn_bed({
        let mut topo = line_topo();
        topo.hosts.push(host("fw1", "10.0.0.9", "swB", 9, "phys9"));
        topo
    })
    .await;
    let now = unix_now();

    let steer = SteerPledge::new(
        "s1",
        "alice",
        "tenant1",
        "vm1",
        "vm2",
        vec!["fw1".into()],
        now + 5,
        now + 600,
        now,
    )
    .unwrap();
    bed.add(Pledge::Steer(steer)).await.unwrap();
    bed.push_tick().await;

    let fmods = flowmod_strings(&bed.drain_agent().await);
    // one hop toward the middlebox, one from it to the destination
    assert_eq!(fmods.len(), 2, "fmods: {fmods:#?}");
    assert!(fmods.iter().all(|f| f.contains("add 0xe5d br-int")));
    // first hop rewrites the destination mac to the middlebox
    assert!(fmods[0].contains("--action -d fa:16:3e:00:00:09"));
    // second hop late-binds its inbound port to the middlebox mac
    assert!(fmods[1].contains("-i fa:16:3e:00:00:09"));
}

#[tokio::test]
async fn queue_tick_regenerates_plan_on_state_change() {
    let mut bed = spawn_bed(line_topo()).await;
    let now = unix_now();

    bed.add(TestBed::bandwidth("r1", "alice", 1000, 500, now + 1, now + 600))
        .await
        .unwrap();
    bed.drain_agent().await;

    // let the pledge commence (and the commence second pass), then check
    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    bed.res.send(ResRequest::QueueTick).await.unwrap();

    let reqs = bed.drain_agent().await;
    let setq: Vec<&String> = reqs
        .iter()
        .filter_map(|r| match r {
            AgentRequest::SendAll(m) if m.contains(r#""atype":"setqueues""#) => Some(m),
            _ => None,
        })
        .collect();
    assert_eq!(setq.len(), 1, "reqs: {reqs:#?}");
    assert!(setq[0].contains("swA"), "plan should cover the path: {}", setq[0]);

    // no further state change, no further plan
    bed.res.send(ResRequest::QueueTick).await.unwrap();
    let reqs = bed.drain_agent().await;
    assert!(
        !reqs
            .iter()
            .any(|r| matches!(r, AgentRequest::SendAll(m) if m.contains("setqueues"))),
        "quiet tick must not regenerate: {reqs:#?}"
    );
}

#[tokio::test]
async fn refresh_repaths_with_same_id_and_revokes_old_flowmods() {
    let mut bed = spawn_bed(line_topo()).await;
    let now = unix_now();

    bed.add(TestBed::bandwidth("r1", "alice", 1000, 0, now + 10, now + 600))
        .await
        .unwrap();

    let (tx, rx) = oneshot::channel();
    bed.res
        .send(ResRequest::Refresh {
            vmname: "vm1".into(),
            reply: tx,
        })
        .await
        .unwrap();
    assert_eq!(rx.await.unwrap(), 1);

    // original id survives with a fresh path, unpushed until the next tick
    let p = bed.get("r1", "alice").await.unwrap();
    assert!(!p.is_pushed());

    // the yank clone lingers with an imminent expiry so its withdrawal
    // flow-mods can still go out
    let clone = bed.get("r1.yank", "alice").await.unwrap();
    assert!(clone.window().expiry <= unix_now() + 15);

    // one tick pushes both: the clone's revocation set with a short timeout
    // on the default queue, and the rebuilt pledge with its real expiry
    bed.push_tick().await;
    let fmods = flowmod_strings(&bed.drain_agent().await);
    assert_eq!(fmods.len(), 12, "fmods: {fmods:#?}");

    let (short, long): (Vec<&String>, Vec<&String>) =
        fmods.iter().partition(|f| fmod_timeout(f) <= 15);
    assert_eq!(short.len(), 6, "withdrawal set missing: {fmods:#?}");
    assert!(short.iter().all(|f| f.contains("-q 0")));
    assert_eq!(long.len(), 6);
    assert!(long.iter().all(|f| fmod_timeout(f) > 500));
}
