//! Socket-based integration tests: clients replicating through the relay.

use std::time::Duration;

use replica_client::{controls::InputEvent, double_jump::JUMP_CODE, emote::Emote};
use replica_server::server::bind_ephemeral;
use replica_shared::{
    math::Vec3,
    net::{decode_from_bytes, encode_to_bytes, ClientId, EntityId, EntityModified, NetMsg, PROTOCOL_VERSION},
};
use replica_tests::{connect, init_tracing, tick_until, TEST_DT};

/// Unit-style test: protocol messages roundtrip correctly.
#[test]
fn protocol_messages_roundtrip() -> anyhow::Result<()> {
    let hello = NetMsg::Hello {
        protocol: PROTOCOL_VERSION,
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&hello)?)?, hello);

    let welcome = NetMsg::Welcome {
        client_id: ClientId(1),
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&welcome)?)?, welcome);

    let patch = NetMsg::EntityModified(EntityModified::new(EntityId(3)).with_emote(3));
    let json = String::from_utf8(encode_to_bytes(&patch)?.to_vec())?;
    assert_eq!(json, r#"{"type":"entityModified","data":{"id":3,"e":3}}"#);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawn_jump_and_leave_replicate() -> anyhow::Result<()> {
    init_tracing();
    let (server, cfg) = bind_ephemeral().await?;
    tokio::spawn(server.run());

    let mut a = connect(&cfg, "Ada").await?;
    let mut b = connect(&cfg, "Bob").await?;
    let id = a.world_mut().spawn_local(Vec3::new(1.0, 0.0, 2.0))?;

    tick_until(&mut [&mut a, &mut b], 1, |b| b.world().replica(id).is_some()).await?;
    let owner = a.client_id;
    assert_eq!(a.world().client_id(), Some(owner));
    assert_eq!(a.world().local().expect("local").view().network_id, owner);
    let replica = b.world().replica(id).expect("replica");
    assert_eq!(replica.owner(), owner);
    assert_eq!(replica.user().name, "Ada");
    assert_eq!(replica.position(), Vec3::new(1.0, 0.0, 2.0));

    // Primary jump, then the secondary one in the air.
    for _ in 0..2 {
        a.world_mut().input(&InputEvent::Press(JUMP_CODE.to_string()));
        a.world_mut().input(&InputEvent::Release(JUMP_CODE.to_string()));
        a.tick(TEST_DT).await?;
    }
    assert_eq!(
        a.world().local().expect("local").body().linear_velocity().y,
        cfg.double_jump_force
    );

    let mut saw_flip = false;
    tick_until(&mut [&mut a, &mut b], 1, |b| {
        let replica = b.world().replica(id).expect("replica");
        saw_flip |= replica.emote() == Emote::DoubleJump;
        saw_flip && replica.target_position().y > 0.5
    })
    .await?;

    a.shutdown().await?;
    tick_until(&mut [&mut b], 0, |b| b.world().replica(id).is_none()).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_joiner_and_dropped_connection() -> anyhow::Result<()> {
    init_tracing();
    let (server, cfg) = bind_ephemeral().await?;
    tokio::spawn(server.run());

    let mut a = connect(&cfg, "Ada").await?;
    let id = a.world_mut().spawn_local(Vec3::new(4.0, 0.0, 0.0))?;
    a.world_mut().teleport_local(Vec3::new(4.0, 0.0, 8.0));
    for _ in 0..20 {
        a.tick(TEST_DT).await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut c = connect(&cfg, "Cy").await?;
    tick_until(&mut [&mut c], 0, |c| {
        c.world()
            .replica(id)
            .is_some_and(|r| r.target_position() == Vec3::new(4.0, 0.0, 8.0))
    })
    .await?;

    // No goodbye: the relay notices the socket closing.
    drop(a);
    tick_until(&mut [&mut c], 0, |c| c.world().replica(id).is_none()).await?;
    Ok(())
}
