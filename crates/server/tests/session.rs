//! End-to-end session tests driving `session::run` over in-memory
//! duplex streams: a test acts as the client, byte-for-byte.

use std::io::Read as _;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use cobalt_protocol::{EXTENSION_MAGIC, PROTOCOL_VERSION, Packet, Position, read_packet};
use cobalt_server::ServerState;
use cobalt_server::config::Config;
use cobalt_server::net::session;
use md5::{Digest, Md5};
use tokio::io::{AsyncWriteExt, DuplexStream};

fn small_state_with(customize: impl FnOnce(&mut Config)) -> Arc<ServerState> {
    let mut config = Config::default();
    config.world.width = 16;
    config.world.height = 16;
    config.world.length = 16;
    config.max_sessions = 4;
    customize(&mut config);
    ServerState::new(config)
}

fn small_state() -> Arc<ServerState> {
    small_state_with(|_| {})
}

fn connect(state: &Arc<ServerState>, addr: &str) -> DuplexStream {
    let (client, server) = tokio::io::duplex(256 * 1024);
    let (read, write) = tokio::io::split(server);
    let state = Arc::clone(state);
    let addr: IpAddr = addr.parse().unwrap();
    tokio::spawn(async move {
        let _ = session::run(read, write, addr, state).await;
    });
    client
}

async fn send(client: &mut DuplexStream, packet: Packet) {
    client.write_all(&packet.encode()).await.unwrap();
    client.flush().await.unwrap();
}

/// Next packet from the server, skipping keep-alive pings.
async fn next_packet(client: &mut DuplexStream) -> Packet {
    loop {
        let packet = tokio::time::timeout(Duration::from_secs(5), read_packet(client))
            .await
            .expect("server went quiet")
            .expect("read failed");
        if !matches!(packet, Packet::Ping) {
            return packet;
        }
    }
}

async fn send_handshake(client: &mut DuplexStream, name: &str, token: &str) {
    send(
        client,
        Packet::Identification {
            version: PROTOCOL_VERSION,
            name: name.into(),
            detail: token.into(),
            pad: 0,
        },
    )
    .await;
}

/// Drive a complete plain (no extensions) login and return the
/// decompressed world stream and the spawn position.
async fn login(client: &mut DuplexStream, name: &str) -> (Vec<u8>, Position) {
    send_handshake(client, name, "").await;

    let ack = next_packet(client).await;
    assert!(matches!(ack, Packet::Identification { version: 7, .. }), "got {ack:?}");
    assert_eq!(next_packet(client).await, Packet::LevelInitialize);

    let mut compressed = Vec::new();
    loop {
        match next_packet(client).await {
            Packet::LevelDataChunk { len, data, .. } => {
                compressed.extend_from_slice(&data[..len as usize]);
            }
            Packet::LevelFinalize { width, height, length } => {
                assert_eq!((width, height, length), (16, 16, 16));
                break;
            }
            other => panic!("unexpected packet during transfer: {other:?}"),
        }
    }

    let spawn = match next_packet(client).await {
        Packet::SpawnEntity { id: -1, pos, .. } => pos,
        other => panic!("expected self spawn, got {other:?}"),
    };
    match next_packet(client).await {
        Packet::Teleport { id: -1, .. } => {}
        other => panic!("expected self teleport, got {other:?}"),
    }

    let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
    let mut stream = Vec::new();
    decoder.read_to_end(&mut stream).unwrap();
    (stream, spawn)
}

async fn read_until_disconnect(client: &mut DuplexStream) -> String {
    loop {
        if let Packet::Disconnect { reason } = next_packet(client).await {
            return reason;
        }
    }
}

#[tokio::test]
async fn login_transfers_the_whole_world() {
    let state = small_state();
    let mut client = connect(&state, "127.0.0.1");

    let (stream, spawn) = login(&mut client, "Alice").await;
    let count = u32::from_be_bytes(stream[..4].try_into().unwrap()) as usize;
    assert_eq!(count, 16 * 16 * 16);
    assert_eq!(stream.len(), 4 + count);
    assert_eq!(&stream[4..], &state.world.snapshot()[..]);
    assert_eq!(spawn, state.world.spawn());
    assert_eq!(state.registry.count(), 1);
}

#[tokio::test]
async fn wrong_protocol_version_is_rejected() {
    let state = small_state();
    let mut client = connect(&state, "127.0.0.1");

    send(
        &mut client,
        Packet::Identification {
            version: 6,
            name: "Old".into(),
            detail: String::new(),
            pad: 0,
        },
    )
    .await;
    let reason = read_until_disconnect(&mut client).await;
    assert!(reason.contains("Incompatible"), "got {reason:?}");
    assert_eq!(state.registry.count(), 0);
}

#[tokio::test]
async fn plain_clients_receive_translated_snapshots() {
    let state = small_state();
    // A custom slab sits in the world before anyone connects.
    assert!(state.world.set_block("test", 0, 12, 0, 50));

    let mut client = connect(&state, "127.0.0.1");
    let (stream, _) = login(&mut client, "Plain").await;
    // (0, 12, 0) is index 12*16*16 in the flat layout, after the count.
    assert_eq!(stream[4 + 12 * 16 * 16], 44);
}

#[tokio::test]
async fn negotiated_clients_receive_custom_blocks_verbatim() {
    let state = small_state();
    assert!(state.world.set_block("test", 0, 12, 0, 50));
    let mut client = connect(&state, "127.0.0.1");

    send(
        &mut client,
        Packet::Identification {
            version: PROTOCOL_VERSION,
            name: "Fancy".into(),
            detail: String::new(),
            pad: EXTENSION_MAGIC,
        },
    )
    .await;

    // The server announces its table first.
    let count = match next_packet(&mut client).await {
        Packet::ExtInfo { count, .. } => count,
        other => panic!("expected ExtInfo, got {other:?}"),
    };
    let mut names = Vec::new();
    for _ in 0..count {
        match next_packet(&mut client).await {
            Packet::ExtEntry { name, version } => names.push((name, version)),
            other => panic!("expected ExtEntry, got {other:?}"),
        }
    }
    assert!(names.contains(&("CustomBlocks".into(), 1)));

    send(&mut client, Packet::ExtInfo { app_name: "test client".into(), count: 1 }).await;
    send(&mut client, Packet::ExtEntry { name: "CustomBlocks".into(), version: 1 }).await;
    assert_eq!(
        next_packet(&mut client).await,
        Packet::CustomBlockSupportLevel { level: 1 }
    );
    send(&mut client, Packet::CustomBlockSupportLevel { level: 1 }).await;

    // Handshake ack and world transfer follow as usual.
    let ack = next_packet(&mut client).await;
    assert!(matches!(ack, Packet::Identification { .. }));
    assert_eq!(next_packet(&mut client).await, Packet::LevelInitialize);
    let mut compressed = Vec::new();
    loop {
        match next_packet(&mut client).await {
            Packet::LevelDataChunk { len, data, .. } => {
                compressed.extend_from_slice(&data[..len as usize]);
            }
            Packet::LevelFinalize { .. } => break,
            other => panic!("unexpected packet during transfer: {other:?}"),
        }
    }
    let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
    let mut stream = Vec::new();
    decoder.read_to_end(&mut stream).unwrap();
    assert_eq!(stream[4 + 12 * 16 * 16], 50);
}

#[tokio::test]
async fn duplicate_name_replaces_the_old_session() {
    let state = small_state();
    let mut first = connect(&state, "10.0.0.1");
    login(&mut first, "Dupe").await;
    assert_eq!(state.registry.count(), 1);

    // The second login blocks until the first session has fully torn
    // down, so its completion proves the synchronous eviction.
    let mut second = connect(&state, "10.0.0.2");
    login(&mut second, "Dupe").await;

    let reason = read_until_disconnect(&mut first).await;
    assert_eq!(reason, "Logged in from another location");
    assert_eq!(state.registry.count(), 1);
}

#[tokio::test]
async fn block_burst_gets_the_session_kicked() {
    let state = small_state();
    let mut client = connect(&state, "127.0.0.1");
    login(&mut client, "Spammer").await;

    // 47 edits are tolerated inside the window; the 48th is the kick.
    for _ in 0..48 {
        send(
            &mut client,
            Packet::SetBlockClient { x: 8, y: 8, z: 8, mode: 1, block: 1 },
        )
        .await;
    }
    let reason = read_until_disconnect(&mut client).await;
    assert_eq!(reason, "You are building too fast");
}

#[tokio::test]
async fn rejected_movement_is_rewound_to_the_last_valid_position() {
    let state = small_state();
    let mut client = connect(&state, "127.0.0.1");
    let (_, spawn) = login(&mut client, "Speedy").await;

    let far = Position::from_blocks(spawn.block_x() + 100.0, spawn.block_y(), 0.0);
    // First oversized hop is tolerated, the second is rejected and the
    // server teleports the client back.
    send(&mut client, Packet::Teleport { id: -1, pos: far }).await;
    send(&mut client, Packet::Teleport { id: -1, pos: far }).await;

    loop {
        match next_packet(&mut client).await {
            Packet::Teleport { id: -1, pos } => {
                assert_eq!(pos, spawn);
                break;
            }
            Packet::Message { .. } => {} // join announcement
            other => panic!("unexpected packet: {other:?}"),
        }
    }
}

#[tokio::test]
async fn fragmented_packets_survive_loop_boundaries() {
    let state = small_state();
    let mut client = connect(&state, "127.0.0.1");
    login(&mut client, "Patient").await;

    // A packet split mid-payload, with a pause much longer than the
    // session loop interval, must still parse as one packet.
    let bytes = Packet::Message { id: -1, text: "still here".into() }.encode();
    client.write_all(&bytes[..10]).await.unwrap();
    client.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    client.write_all(&bytes[10..]).await.unwrap();
    client.flush().await.unwrap();

    loop {
        match next_packet(&mut client).await {
            Packet::Message { text, .. } if text.contains("still here") => break,
            Packet::Disconnect { reason } => panic!("session kicked: {reason:?}"),
            _ => {}
        }
    }
}

#[tokio::test]
async fn banned_name_is_rejected_with_its_reason() {
    let state = small_state();
    state.access.ban_name("Griefer");
    let mut client = connect(&state, "127.0.0.1");
    send_handshake(&mut client, "Griefer", "").await;
    assert_eq!(read_until_disconnect(&mut client).await, "You are banned");
    assert_eq!(state.registry.count(), 0);
}

#[tokio::test]
async fn banned_address_is_rejected_with_its_reason() {
    let state = small_state();
    state.access.ban_address("10.9.9.9".parse().unwrap());
    let mut client = connect(&state, "10.9.9.9");
    send_handshake(&mut client, "Anyone", "").await;
    assert_eq!(read_until_disconnect(&mut client).await, "Your address is banned");
    assert_eq!(state.registry.count(), 0);
}

#[tokio::test]
async fn allow_list_gates_unknown_names() {
    let state = small_state_with(|c| c.use_allowlist = true);
    state.access.allow("Friend");

    let mut stranger = connect(&state, "10.0.0.1");
    send_handshake(&mut stranger, "Stranger", "").await;
    assert_eq!(
        read_until_disconnect(&mut stranger).await,
        "You are not on the allow-list"
    );

    let mut friend = connect(&state, "10.0.0.2");
    login(&mut friend, "Friend").await;
    assert_eq!(state.registry.count(), 1);
}

#[tokio::test]
async fn name_verification_requires_the_salted_token() {
    let state = small_state_with(|c| {
        c.verify_names = true;
        c.salt = "pepper".into();
    });

    let mut forger = connect(&state, "10.0.0.1");
    send_handshake(&mut forger, "Bob", "not-the-right-token").await;
    assert_eq!(
        read_until_disconnect(&mut forger).await,
        "Name verification failed"
    );

    // The token is the hex MD5 of salt + name, compared
    // case-insensitively.
    let token = hex::encode(Md5::digest("pepperBob")).to_ascii_uppercase();
    let mut genuine = connect(&state, "10.0.0.2");
    send_handshake(&mut genuine, "Bob", &token).await;
    let ack = next_packet(&mut genuine).await;
    assert!(matches!(ack, Packet::Identification { .. }), "got {ack:?}");
    assert_eq!(state.registry.count(), 1);
}

#[tokio::test]
async fn chat_reaches_every_session_with_attribution() {
    let state = small_state();
    let mut alice = connect(&state, "10.0.0.1");
    let mut bob = connect(&state, "10.0.0.2");
    login(&mut alice, "Alice").await;
    login(&mut bob, "Bob").await;

    send(&mut bob, Packet::Message { id: -1, text: "hello world".into() }).await;

    loop {
        match next_packet(&mut alice).await {
            Packet::Message { id, text } if text.contains("hello world") => {
                let bob_id = state.registry.find_by_exact_name("Bob").unwrap().id();
                assert_eq!(id, bob_id);
                assert_eq!(text, "Bob: &fhello world");
                break;
            }
            // Join announcements and Bob's spawn packets interleave.
            Packet::Message { .. } | Packet::SpawnEntity { .. } | Packet::Teleport { .. } => {}
            other => panic!("unexpected packet: {other:?}"),
        }
    }
}
