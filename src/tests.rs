use super::usm::{
    self, auth, discovery, keys, privacy, AuthProtocol, Cipher, DiscoveryTransport,
    MessageCorrelator, MessageProcessor, TimeWindow,
};
use super::{pdu, snmp};
use super::{
    AsnReader, AuthErrorKind, ConfigError, DiscoveryError, SnmpError, SnmpMessageType,
};
use std::sync::Arc;

fn hex(s: &str) -> Vec<u8> {
    s.as_bytes()
        .chunks(2)
        .map(|pair| u8::from_str_radix(std::str::from_utf8(pair).unwrap(), 16).unwrap())
        .collect()
}

#[test]
fn build_getnext_pdu() {
    let mut pdu = pdu::Buf::default();
    pdu::build_community(
        snmp::MSG_GET_NEXT,
        snmp::VERSION_1,
        b"tyS0n43d",
        1251699618,
        0,
        0,
        [&[1u32, 3, 6, 1, 2, 1, 1, 1, 0][..]],
        &mut pdu,
    );

    let expected = &[
        0x30, 0x2b, 0x02, 0x01, 0x00, 0x04, 0x08, 0x74, 0x79, 0x53, 0x30, 0x6e, 0x34, 0x33, 0x64,
        0xa1, 0x1c, 0x02, 0x04, 0x4a, 0x9b, 0x6b, 0xa2, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30,
        0x0e, 0x30, 0x0c, 0x06, 0x08, 0x2b, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00, 0x05, 0x00,
    ];

    println!("{:?}", pdu);
    println!("{:?}", &expected[..]);

    assert_eq!(&pdu[..], &expected[..]);
}

#[test]
fn asn_read_byte() {
    let bytes = [1, 2, 3, 4];
    let mut reader = AsnReader::from_bytes(&bytes[..]);
    let a = reader.read_byte().unwrap();
    let b = reader.read_byte().unwrap();
    let c = reader.read_byte().unwrap();
    let d = reader.read_byte().unwrap();
    assert_eq!(&[a, b, c, d], &bytes[..]);
    assert_eq!(reader.read_byte(), Err(SnmpError::AsnEof));
}

#[test]
fn asn_parse_getnext_pdu() {
    let pdu = &[
        0x30, 0x2b, 0x02, 0x01, 0x01, 0x04, 0x08, 0x74, 0x79, 0x53, 0x30, 0x6e, 0x34, 0x33, 0x64,
        0xa1, 0x1c, 0x02, 0x04, 0x4a, 0x9b, 0x6b, 0xa2, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30,
        0x0e, 0x30, 0x0c, 0x06, 0x08, 0x2b, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00, 0x05, 0x00,
    ];
    let mut reader = AsnReader::from_bytes(&pdu[..]);
    reader
        .read_asn_sequence(|rdr| {
            let version = rdr.read_asn_integer()?;
            assert_eq!(version, snmp::VERSION_2 as i64);
            let community = rdr.read_asn_octetstring()?;
            assert_eq!(community, b"tyS0n43d");
            let msg_ident = rdr.peek_byte()?;
            assert_eq!(msg_ident, snmp::MSG_GET_NEXT);
            rdr.read_constructed(msg_ident, |rdr| {
                let req_id = rdr.read_asn_integer()?;
                let error_status = rdr.read_asn_integer()?;
                let error_index = rdr.read_asn_integer()?;
                assert_eq!(req_id, 1251699618);
                assert_eq!(error_status, 0);
                assert_eq!(error_index, 0);
                rdr.read_asn_sequence(|rdr| {
                    rdr.read_asn_sequence(|rdr| {
                        let name = rdr.read_asn_objectidentifier()?;
                        let expected = [1, 3, 6, 1, 2, 1, 1, 1, 0];
                        assert_eq!(name, &expected[..]);
                        rdr.read_asn_null()
                    })
                })
            })
        })
        .unwrap();
}

// RFC 3414 appendix A.3 test vectors, password "maplesyrup" and
// engine ID 000000000000000000000002.

const VECTOR_ENGINE: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];

#[test]
fn password_to_key_md5_vector() {
    let ku = keys::password_to_key(AuthProtocol::Md5, b"maplesyrup").unwrap();
    assert_eq!(ku, hex("9faf3283884e92834ebc9847d8edd963"));
    let kul = keys::localize_key(AuthProtocol::Md5, &ku, &VECTOR_ENGINE).unwrap();
    assert_eq!(kul, hex("526f5eed9fcce26f8964c2930787d82b"));
}

#[test]
fn password_to_key_sha1_vector() {
    let ku = keys::password_to_key(AuthProtocol::Sha1, b"maplesyrup").unwrap();
    assert_eq!(ku, hex("9fb5cc0381497b3793528939ff788d5d79145211"));
    let kul = keys::localize_key(AuthProtocol::Sha1, &ku, &VECTOR_ENGINE).unwrap();
    assert_eq!(kul, hex("6695febc9288e36282235fc7151f128497b38f3f"));
}

#[test]
fn password_to_key_rejects_empty_password() {
    assert_eq!(
        keys::password_to_key(AuthProtocol::Sha1, b""),
        Err(SnmpError::Config(ConfigError::MissingAuthPassword))
    );
}

#[test]
fn priv_key_sizing() {
    // MD5 yields 16 bytes, not enough for a 32 byte AES-256 key.
    assert_eq!(
        keys::derive_priv_key(AuthProtocol::Md5, Cipher::Aes256, b"maplesyrup", &VECTOR_ENGINE),
        Err(SnmpError::Config(ConfigError::UnsupportedKeyLength))
    );
    // SHA-512 yields 64 bytes, truncated down to what DES needs.
    let key =
        keys::derive_priv_key(AuthProtocol::Sha512, Cipher::Des, b"maplesyrup", &VECTOR_ENGINE)
            .unwrap();
    assert_eq!(key.len(), 16);
    let key =
        keys::derive_priv_key(AuthProtocol::Sha256, Cipher::Aes256, b"maplesyrup", &VECTOR_ENGINE)
            .unwrap();
    assert_eq!(key.len(), 32);
}

#[test]
fn hmac_sign_and_verify() {
    let key = keys::derive_auth_key(AuthProtocol::Sha1, b"maplesyrup", &VECTOR_ENGINE).unwrap();
    // the authentication parameters field holds garbage; signing
    // zeroes it before digesting
    let mut message = vec![0xaau8; 80];
    let auth_pos = 30;
    auth::sign(AuthProtocol::Sha1, &key, &mut message, auth_pos).unwrap();
    let signed = message.clone();
    auth::verify(AuthProtocol::Sha1, &key, &mut message, auth_pos).unwrap();
    // verification leaves the buffer as received
    assert_eq!(message, signed);
    // re-signing is idempotent, the old fingerprint does not leak in
    auth::sign(AuthProtocol::Sha1, &key, &mut message, auth_pos).unwrap();
    assert_eq!(message, signed);

    message[5] ^= 1;
    assert_eq!(
        auth::verify(AuthProtocol::Sha1, &key, &mut message, auth_pos),
        Err(SnmpError::Auth(AuthErrorKind::SignatureMismatch))
    );
    message[5] ^= 1;

    let wrong = keys::derive_auth_key(AuthProtocol::Sha1, b"notmaplesyrup", &VECTOR_ENGINE).unwrap();
    assert_eq!(
        auth::verify(AuthProtocol::Sha1, &wrong, &mut message, auth_pos),
        Err(SnmpError::Auth(AuthErrorKind::SignatureMismatch))
    );
}

#[test]
fn des_encrypt_decrypt() {
    let key =
        keys::derive_priv_key(AuthProtocol::Md5, Cipher::Des, b"maplesyrup", &VECTOR_ENGINE)
            .unwrap();
    let salt = privacy::SaltCounter::new().unwrap();
    let plaintext = b"not block aligned plaintext";
    let (ciphertext, priv_params) =
        privacy::encrypt(Cipher::Des, &key, 7, 1234, &salt, plaintext).unwrap();
    assert_eq!(priv_params.len(), 8);
    assert_eq!(ciphertext.len() % 8, 0);
    assert!(ciphertext.len() >= plaintext.len());

    let plain = privacy::decrypt(Cipher::Des, &key, 7, 1234, &priv_params, &ciphertext).unwrap();
    // DES padding survives decryption; the ASN.1 length inside the
    // scoped PDU delimits the real content.
    assert_eq!(&plain[..plaintext.len()], &plaintext[..]);

    assert_eq!(
        privacy::decrypt(Cipher::Des, &key, 7, 1234, &priv_params[..4], &ciphertext),
        Err(SnmpError::Auth(AuthErrorKind::PrivLengthMismatch))
    );
    assert_eq!(
        privacy::decrypt(Cipher::Des, &key, 7, 1234, &priv_params, &ciphertext[..11]),
        Err(SnmpError::Auth(AuthErrorKind::PayloadLengthMismatch))
    );
}

#[test]
fn aes_encrypt_decrypt() {
    for (proto, cipher) in [
        (AuthProtocol::Sha1, Cipher::Aes128),
        (AuthProtocol::Sha256, Cipher::Aes192),
        (AuthProtocol::Sha512, Cipher::Aes256),
    ] {
        let key = keys::derive_priv_key(proto, cipher, b"maplesyrup", &VECTOR_ENGINE).unwrap();
        let salt = privacy::SaltCounter::new().unwrap();
        let plaintext = b"cfb mode needs no padding at all";
        let (ciphertext, priv_params) =
            privacy::encrypt(cipher, &key, 3, 99, &salt, plaintext).unwrap();
        assert_eq!(priv_params.len(), 8);
        assert_eq!(ciphertext.len(), plaintext.len());
        let plain = privacy::decrypt(cipher, &key, 3, 99, &priv_params, &ciphertext).unwrap();
        assert_eq!(&plain[..], &plaintext[..]);
    }
}

#[test]
fn aes_salt_counts_up() {
    let key =
        keys::derive_priv_key(AuthProtocol::Sha1, Cipher::Aes128, b"maplesyrup", &VECTOR_ENGINE)
            .unwrap();
    let salt = privacy::SaltCounter::new().unwrap();
    let (_, s1) = privacy::encrypt(Cipher::Aes128, &key, 3, 99, &salt, b"one").unwrap();
    let (_, s2) = privacy::encrypt(Cipher::Aes128, &key, 3, 99, &salt, b"two").unwrap();
    let mut a = [0u8; 8];
    a.copy_from_slice(&s1);
    let mut b = [0u8; 8];
    b.copy_from_slice(&s2);
    assert_eq!(u64::from_be_bytes(b), u64::from_be_bytes(a).wrapping_add(1));
}

#[test]
fn time_window_seeding() {
    let window = TimeWindow::new();
    let engine = b"engine-a";
    assert!(!window.is_engine_known(engine));
    assert!(window.is_outside_window(engine, 1, 1));

    // unauthenticated values only seed a pristine entry
    window.update(engine, 4, 100, false);
    assert!(window.is_engine_known(engine));
    assert!(!window.is_synchronized(engine));
    window.update(engine, 9, 900, false);
    assert_eq!(window.engine_boots(engine), 4);

    // authenticated confirmation
    window.update(engine, 4, 120, true);
    assert!(window.is_synchronized(engine));
    assert_eq!(window.engine_boots(engine), 4);
    assert!(window.engine_time(engine) >= 120);
}

#[test]
fn time_window_moves_forward_only() {
    let window = TimeWindow::new();
    let engine = b"engine-b";
    window.update(engine, 6, 500, true);
    // lower boots or older time within the same boot are ignored
    window.update(engine, 5, 9999, true);
    assert_eq!(window.engine_boots(engine), 6);
    window.update(engine, 6, 100, true);
    assert!(window.engine_time(engine) >= 500);
    // a reboot advances
    window.update(engine, 7, 10, true);
    assert_eq!(window.engine_boots(engine), 7);
}

#[test]
fn time_window_replay_checks() {
    let window = TimeWindow::new();
    let engine = b"engine-c";
    window.update(engine, 6, 1000, true);

    assert!(!window.is_outside_window(engine, 6, 1000));
    assert!(!window.is_outside_window(engine, 6, 1000 + usm::ENGINE_TIME_WINDOW));
    // a message from a previous boot is a replay
    assert!(window.is_outside_window(engine, 5, 1000));
    // skew past the window
    assert!(window.is_outside_window(engine, 6, 1000 + usm::ENGINE_TIME_WINDOW + 1));
    assert!(window.is_outside_window(engine, 6, 1000 - usm::ENGINE_TIME_WINDOW - 1));
    // later boots are not timeliness failures, the update handles them
    assert!(!window.is_outside_window(engine, 7, 0));

    window.forget(engine);
    assert!(!window.is_engine_known(engine));
    assert!(window.is_outside_window(engine, 6, 1000));
}

#[test]
fn time_window_saturated_boots() {
    let window = TimeWindow::new();
    let engine = b"engine-d";
    window.update(engine, i64::from(i32::MAX), 1, true);
    assert!(window.is_outside_window(engine, i64::from(i32::MAX), 1));
}

#[test]
fn discovery_lock_is_exclusive_per_target() {
    let window = TimeWindow::new();
    let guard = window.try_lock_discovery("198.51.100.23:161");
    assert!(guard.is_some());
    assert!(window.try_lock_discovery("198.51.100.23:161").is_none());
    assert!(window.try_lock_discovery("198.51.100.24:161").is_some());
    drop(guard);
    assert!(window.try_lock_discovery("198.51.100.23:161").is_some());
}

#[test]
fn discovery_lock_blocks_until_released() {
    use std::time::{Duration, Instant};

    let window = Arc::new(TimeWindow::new());
    let guard = window.lock_discovery("t:161");
    let shared = window.clone();
    let waiter = std::thread::spawn(move || {
        let _guard = shared.lock_discovery("t:161");
        Instant::now()
    });
    std::thread::sleep(Duration::from_millis(50));
    let released_at = Instant::now();
    drop(guard);
    let acquired_at = waiter.join().unwrap();
    assert!(acquired_at >= released_at);
}

#[test]
fn correlator_resolves_by_request_id() {
    let correlator = MessageCorrelator::default();
    let msg_id = correlator.register(42);
    assert_ne!(msg_id, 0);
    assert_eq!(correlator.outstanding(), 1);
    assert_eq!(correlator.resolve(msg_id, 42), Some(42));
    assert_eq!(correlator.outstanding(), 0);
    // retired pairings do not match twice
    assert_eq!(correlator.resolve(msg_id, 42), None);
}

#[test]
fn correlator_falls_back_to_msg_id() {
    let correlator = MessageCorrelator::default();
    let msg_id = correlator.register(7);
    // a report built before the agent saw the scoped PDU quotes a
    // request-id of zero
    assert_eq!(correlator.resolve(msg_id, 0), Some(7));
    assert_eq!(correlator.outstanding(), 0);
}

#[test]
fn correlator_never_allocates_zero() {
    let correlator = MessageCorrelator::new(0);
    assert_ne!(correlator.register(1), 0);
}

#[test]
fn correlator_cancel() {
    let correlator = MessageCorrelator::default();
    let msg_id = correlator.register(9);
    correlator.cancel(9);
    assert_eq!(correlator.resolve(msg_id, 9), None);
    assert_eq!(correlator.outstanding(), 0);
}

#[test]
fn security_sanity() {
    let ok = usm::Security::new(b"user", b"authpass").with_privacy(Cipher::Des, b"privpass");
    assert!(ok.check_sanity().is_ok());

    let priv_only = usm::Security::new(b"user", b"").with_privacy(Cipher::Des, b"privpass");
    assert_eq!(
        priv_only.check_sanity(),
        Err(SnmpError::Config(ConfigError::PrivacyWithoutAuth))
    );

    let no_priv_pw = usm::Security::new(b"user", b"authpass").with_privacy(Cipher::Des, b"");
    assert_eq!(
        no_priv_pw.check_sanity(),
        Err(SnmpError::Config(ConfigError::MissingPrivacyPassword))
    );

    let short_key = usm::Security::new(b"user", b"authpass")
        .with_auth_protocol(AuthProtocol::Md5)
        .with_privacy(Cipher::Aes256, b"privpass");
    assert_eq!(
        short_key.check_sanity(),
        Err(SnmpError::Config(ConfigError::UnsupportedKeyLength))
    );
}

#[test]
fn security_from_str() {
    let sec: usm::Security = "user=simon password=verysecret authproto=Sha256 cipher=Aes128 privacy=alsosecret"
        .parse()
        .unwrap();
    assert_eq!(sec.username(), b"simon");
    assert!(sec.check_sanity().is_ok());
    assert_eq!(format!("{}", sec), "username=simon authproto=Sha256 level=AuthPriv cipher=Aes128");

    let err = "user=x password=y authproto=Rot13".parse::<usm::Security>().err().unwrap();
    assert!(matches!(err, SnmpError::Config(ConfigError::BadSecuritySpec(_))));
    assert_eq!(
        "user=x cipher=Aes128 privacy=z".parse::<usm::Security>().err().unwrap(),
        SnmpError::Config(ConfigError::PrivacyWithoutAuth)
    );
}

const TEST_ENGINE: &[u8] = &[0x80, 0x00, 0x1f, 0x88, 0x80, 0xd4, 0x1e, 0x49, 0x46];

fn synchronized_pair(security: usm::Security) -> (MessageProcessor, MessageProcessor) {
    let window = Arc::new(TimeWindow::new());
    window.update(TEST_ENGINE, 3, 1000, true);
    let mut agent = MessageProcessor::new(security.clone(), window.clone()).unwrap();
    agent.set_engine_id(TEST_ENGINE);
    let mut client = MessageProcessor::new(security, window).unwrap();
    client.set_engine_id(TEST_ENGINE);
    (agent, client)
}

fn encode_response(agent: &mut MessageProcessor, req_id: i32) -> Vec<u8> {
    let mut buf = pdu::Buf::default();
    agent
        .encode(
            snmp::MSG_RESPONSE,
            req_id,
            0,
            0,
            [&[1u32, 3, 6, 1, 2, 1, 1, 5, 0][..]],
            &mut buf,
        )
        .unwrap();
    buf[..].to_vec()
}

#[test]
fn round_trip_auth_no_priv() {
    let security = usm::Security::new(b"simon", b"auth_password").with_auth_protocol(AuthProtocol::Sha1);
    let (mut agent, mut client) = synchronized_pair(security);
    let mut bytes = encode_response(&mut agent, 42);

    client.correlator().register(42);
    let mut plain = Vec::new();
    let pdu = client.decode(&mut bytes, &mut plain).unwrap();
    assert_eq!(pdu.message_type, SnmpMessageType::Response);
    assert_eq!(pdu.req_id, 42);
    assert_eq!(pdu.varbinds.clone().count(), 1);
}

#[test]
fn round_trip_auth_priv() {
    for (proto, cipher) in [
        (AuthProtocol::Md5, Cipher::Des),
        (AuthProtocol::Sha1, Cipher::Aes128),
        (AuthProtocol::Sha256, Cipher::Aes256),
    ] {
        let security = usm::Security::new(b"simon", b"auth_password")
            .with_auth_protocol(proto)
            .with_privacy(cipher, b"priv_password");
        let (mut agent, mut client) = synchronized_pair(security);
        let mut bytes = encode_response(&mut agent, 42);

        client.correlator().register(42);
        let mut plain = Vec::new();
        let pdu = client.decode(&mut bytes, &mut plain).unwrap();
        assert_eq!(pdu.message_type, SnmpMessageType::Response);
        assert_eq!(pdu.req_id, 42);
    }
}

#[test]
fn own_get_decodes_back() {
    let engine = [0x01u8, 0x00, 0x00, 0xa1, 0xd4, 0x1e, 0x49, 0x46];
    let window = Arc::new(TimeWindow::new());
    window.update(&engine, 1, 10, true);
    let security = usm::Security::new(b"initial", b"auth_password")
        .with_auth_protocol(AuthProtocol::Md5)
        .with_privacy(Cipher::Des, b"priv_password");
    let mut processor = MessageProcessor::new(security, window).unwrap();
    processor.set_engine_id(&engine);

    let oid = [1u32, 3, 6, 1, 2, 1, 1, 1, 0];
    let mut buf = pdu::Buf::default();
    processor
        .encode(snmp::MSG_GET, 1234, 0, 0, [&oid[..]], &mut buf)
        .unwrap();

    let mut bytes = buf[..].to_vec();
    let mut plain = Vec::new();
    let pdu = processor.decode(&mut bytes, &mut plain).unwrap();
    assert_eq!(pdu.message_type, SnmpMessageType::GetRequest);
    assert_eq!(pdu.req_id, 1234);
    let (name, value) = pdu.varbinds.clone().next().unwrap();
    assert_eq!(name, &oid[..]);
    assert_eq!(value, crate::Value::Null);
}

#[test]
fn tampered_message_is_rejected() {
    let security = usm::Security::new(b"simon", b"auth_password")
        .with_auth_protocol(AuthProtocol::Sha1)
        .with_privacy(Cipher::Aes128, b"priv_password");
    let (mut agent, mut client) = synchronized_pair(security);
    let mut bytes = encode_response(&mut agent, 42);
    client.correlator().register(42);

    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    let mut plain = Vec::new();
    assert_eq!(
        client.decode(&mut bytes, &mut plain).unwrap_err(),
        SnmpError::Auth(AuthErrorKind::SignatureMismatch)
    );
}

#[test]
fn replayed_boots_are_rejected() {
    let security = usm::Security::new(b"simon", b"auth_password").with_auth_protocol(AuthProtocol::Sha1);

    // The agent's idea of its own time line lags behind what the
    // client has already seen authenticated.
    let agent_window = Arc::new(TimeWindow::new());
    agent_window.update(TEST_ENGINE, 5, 1000, true);
    let mut agent = MessageProcessor::new(security.clone(), agent_window).unwrap();
    agent.set_engine_id(TEST_ENGINE);

    let client_window = Arc::new(TimeWindow::new());
    client_window.update(TEST_ENGINE, 6, 1000, true);
    let mut client = MessageProcessor::new(security, client_window).unwrap();
    client.set_engine_id(TEST_ENGINE);

    let mut bytes = encode_response(&mut agent, 42);
    client.correlator().register(42);
    let mut plain = Vec::new();
    assert_eq!(
        client.decode(&mut bytes, &mut plain).unwrap_err(),
        SnmpError::Auth(AuthErrorKind::OutsideTimeWindow)
    );
}

#[test]
fn plaintext_response_under_privacy_is_rejected() {
    let plain_security =
        usm::Security::new(b"simon", b"auth_password").with_auth_protocol(AuthProtocol::Sha1);
    let (mut agent, _) = synchronized_pair(plain_security);
    let mut bytes = encode_response(&mut agent, 42);

    let priv_security = usm::Security::new(b"simon", b"auth_password")
        .with_auth_protocol(AuthProtocol::Sha1)
        .with_privacy(Cipher::Aes128, b"priv_password");
    let (_, mut client) = synchronized_pair(priv_security);
    client.correlator().register(42);
    let mut plain = Vec::new();
    assert_eq!(
        client.decode(&mut bytes, &mut plain).unwrap_err(),
        SnmpError::Auth(AuthErrorKind::NotEncrypted)
    );
}

#[test]
fn username_mismatch_is_rejected() {
    let security = usm::Security::new(b"simon", b"auth_password").with_auth_protocol(AuthProtocol::Sha1);
    let (mut agent, _) = synchronized_pair(security);
    let mut bytes = encode_response(&mut agent, 42);

    let other = usm::Security::new(b"garfunkel", b"auth_password").with_auth_protocol(AuthProtocol::Sha1);
    let (_, mut client) = synchronized_pair(other);
    client.correlator().register(42);
    let mut plain = Vec::new();
    assert_eq!(
        client.decode(&mut bytes, &mut plain).unwrap_err(),
        SnmpError::Auth(AuthErrorKind::UsernameMismatch)
    );
}

#[test]
fn engine_id_mismatch_is_rejected() {
    let security = usm::Security::new(b"simon", b"auth_password").with_auth_protocol(AuthProtocol::Sha1);
    let (mut agent, mut client) = synchronized_pair(security);
    client.set_engine_id(b"some-other-engine");
    client.time_window().update(b"some-other-engine", 3, 1000, true);
    let mut bytes = encode_response(&mut agent, 42);
    client.correlator().register(42);
    let mut plain = Vec::new();
    assert_eq!(
        client.decode(&mut bytes, &mut plain).unwrap_err(),
        SnmpError::Auth(AuthErrorKind::EngineIdMismatch)
    );
}

#[test]
fn uncorrelated_response_is_rejected() {
    let security = usm::Security::new(b"simon", b"auth_password").with_auth_protocol(AuthProtocol::Sha1);
    let (mut agent, mut client) = synchronized_pair(security);
    let mut bytes = encode_response(&mut agent, 42);
    // nothing registered on the client side
    let mut plain = Vec::new();
    assert_eq!(
        client.decode(&mut bytes, &mut plain).unwrap_err(),
        SnmpError::CorrelationMiss
    );
}

#[test]
fn password_change_drops_cached_keys() {
    let security = usm::Security::new(b"simon", b"auth_password").with_auth_protocol(AuthProtocol::Sha1);
    let (mut agent, mut client) = synchronized_pair(security);

    // prime the client's key cache with a successful exchange
    let mut bytes = encode_response(&mut agent, 42);
    client.correlator().register(42);
    let mut plain = Vec::new();
    client.decode(&mut bytes, &mut plain).unwrap();

    client.set_authentication_password(b"rotated_password");
    let mut bytes = encode_response(&mut agent, 43);
    client.correlator().register(43);
    assert_eq!(
        client.decode(&mut bytes, &mut plain).unwrap_err(),
        SnmpError::Auth(AuthErrorKind::SignatureMismatch)
    );
}

#[test]
fn processor_ready_reports_missing_discovery_step() {
    let security = usm::Security::new(b"simon", b"auth_password").with_auth_protocol(AuthProtocol::Sha1);
    let window = Arc::new(TimeWindow::new());
    let mut processor = MessageProcessor::new(security, window.clone()).unwrap();

    assert_eq!(
        processor.ready().unwrap_err(),
        SnmpError::Discovery(DiscoveryError::EngineIdUnknown)
    );
    processor.set_engine_id(TEST_ENGINE);
    assert_eq!(
        processor.ready().unwrap_err(),
        SnmpError::Discovery(DiscoveryError::TimelineUnknown)
    );
    window.update(TEST_ENGINE, 1, 1, true);
    assert!(processor.ready().is_ok());

    processor.reset_engine();
    assert_eq!(
        processor.ready().unwrap_err(),
        SnmpError::Discovery(DiscoveryError::EngineIdUnknown)
    );
    assert!(!window.is_engine_known(TEST_ENGINE));
}

#[test]
fn probe_encoding() {
    let mut buf = pdu::Buf::default();
    discovery::build_probe(1, 1, &mut buf);
    let expected = &[
        0x30, 0x37, // message
        0x02, 0x01, 0x03, // version
        0x30, 0x0d, // global header
        0x02, 0x01, 0x01, // msg id
        0x02, 0x02, 0x10, 0x00, // max size
        0x04, 0x01, 0x04, // flags: reportable
        0x02, 0x01, 0x03, // security model: USM
        0x04, 0x10, // security parameters
        0x30, 0x0e, 0x04, 0x00, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x04, 0x00, 0x04, 0x00, 0x04,
        0x00, // all empty
        0x30, 0x11, // scoped pdu
        0x04, 0x00, 0x04, 0x00, // context engine id, context name
        0xa0, 0x0b, // GET
        0x02, 0x01, 0x01, // request id
        0x02, 0x01, 0x00, 0x02, 0x01, 0x00, // error status, index
        0x30, 0x00, // no varbinds
    ];
    assert_eq!(&buf[..], &expected[..]);
}

fn build_engine_report(req_id: i32, boots: i64, time: i64) -> Vec<u8> {
    // an agent answers the engine ID probe without authentication
    let window = Arc::new(TimeWindow::new());
    window.update(TEST_ENGINE, boots, time, true);
    let security = usm::Security::new(b"simon", b"").without_authentication();
    let mut agent = MessageProcessor::new(security, window).unwrap();
    agent.set_engine_id(TEST_ENGINE);
    let mut buf = pdu::Buf::default();
    agent
        .encode(
            snmp::MSG_REPORT,
            req_id,
            0,
            0,
            [&[1u32, 3, 6, 1, 6, 3, 15, 1, 1, 4, 0][..]],
            &mut buf,
        )
        .unwrap();
    buf[..].to_vec()
}

#[test]
fn parse_engine_report() {
    let bytes = build_engine_report(77, 5, 600);
    let report = discovery::parse_report(&bytes).unwrap();
    assert_eq!(report.engine_id, TEST_ENGINE);
    assert_eq!(report.boots, 5);
    assert_eq!(report.req_id, 77);
    assert!(discovery::parse_report(&bytes[..10]).is_err());
}

struct ScriptedTransport {
    // popped back to front
    responses: Vec<Vec<u8>>,
    exchanges: usize,
}

impl DiscoveryTransport for ScriptedTransport {
    fn exchange(&mut self, _request: &[u8], response: &mut [u8]) -> crate::SnmpResult<usize> {
        self.exchanges += 1;
        let resp = self.responses.pop().ok_or(SnmpError::Timeout)?;
        response[..resp.len()].copy_from_slice(&resp);
        Ok(resp.len())
    }
}

fn build_time_report(req_id: i32, boots: i64, time: i64) -> Vec<u8> {
    let window = Arc::new(TimeWindow::new());
    window.update(TEST_ENGINE, boots, time, true);
    let security = usm::Security::new(b"simon", b"auth_password").with_auth_protocol(AuthProtocol::Sha1);
    let mut agent = MessageProcessor::new(security, window).unwrap();
    agent.set_engine_id(TEST_ENGINE);
    let mut buf = pdu::Buf::default();
    agent
        .encode(
            snmp::MSG_REPORT,
            req_id,
            0,
            0,
            [&[1u32, 3, 6, 1, 6, 3, 15, 1, 1, 2, 0][..]],
            &mut buf,
        )
        .unwrap();
    buf[..].to_vec()
}

#[test]
fn discovery_handshake() {
    let security = usm::Security::new(b"simon", b"auth_password").with_auth_protocol(AuthProtocol::Sha1);
    let window = Arc::new(TimeWindow::new());
    let mut client = MessageProcessor::new(security, window.clone()).unwrap();

    let mut transport = ScriptedTransport {
        responses: vec![build_time_report(101, 5, 600), build_engine_report(100, 5, 600)],
        exchanges: 0,
    };
    let next = discovery::discover(&mut client, &mut transport, "t:161", 100, 0).unwrap();
    assert_eq!(next, 102);
    assert_eq!(transport.exchanges, 2);
    assert_eq!(client.engine_id(), TEST_ENGINE);
    assert!(client.ready().is_ok());
    assert!(window.is_synchronized(TEST_ENGINE));
}

#[test]
fn second_session_skips_discovery_entirely() {
    let security = usm::Security::new(b"simon", b"auth_password").with_auth_protocol(AuthProtocol::Sha1);
    let window = Arc::new(TimeWindow::new());

    let mut first = MessageProcessor::new(security.clone(), window.clone()).unwrap();
    let mut transport = ScriptedTransport {
        responses: vec![build_time_report(101, 5, 600), build_engine_report(100, 5, 600)],
        exchanges: 0,
    };
    discovery::discover(&mut first, &mut transport, "t:161", 100, 0).unwrap();
    assert_eq!(window.engine_for_target("t:161").as_deref(), Some(TEST_ENGINE));

    // same target through the same window: the recorded engine ID and
    // the confirmed time line make both probes unnecessary
    let mut second = MessageProcessor::new(security, window.clone()).unwrap();
    let mut transport = ScriptedTransport {
        responses: vec![],
        exchanges: 0,
    };
    let next = discovery::discover(&mut second, &mut transport, "t:161", 200, 0).unwrap();
    assert_eq!(next, 200);
    assert_eq!(transport.exchanges, 0);
    assert_eq!(second.engine_id(), TEST_ENGINE);
    assert!(second.ready().is_ok());

    // forgetting the engine also drops the target record
    window.forget(TEST_ENGINE);
    assert!(window.engine_for_target("t:161").is_none());
}

#[test]
fn report_oids_name_the_failure() {
    let cases: [(&[u32], SnmpError); 4] = [
        (
            discovery::USM_STATS_WRONG_DIGESTS,
            SnmpError::Auth(AuthErrorKind::SignatureMismatch),
        ),
        (
            discovery::USM_STATS_UNKNOWN_USER_NAMES,
            SnmpError::Auth(AuthErrorKind::UsernameMismatch),
        ),
        (
            discovery::USM_STATS_DECRYPTION_ERRORS,
            SnmpError::Auth(AuthErrorKind::DecryptionError),
        ),
        (
            discovery::USM_STATS_NOT_IN_TIME_WINDOWS,
            SnmpError::Discovery(DiscoveryError::TimelineUnknown),
        ),
    ];
    for (oid, expected) in cases {
        let mut buf = pdu::Buf::default();
        pdu::build_community(
            snmp::MSG_REPORT,
            snmp::VERSION_2,
            b"",
            9,
            0,
            0,
            [(oid, crate::Value::Counter32(1))],
            &mut buf,
        );
        let pdu = crate::SnmpPdu::from_bytes(&buf[..]).unwrap();
        assert_eq!(pdu.message_type, SnmpMessageType::Report);
        assert_eq!(discovery::report_error(&pdu), expected);
    }
}

#[test]
fn session_rejects_bad_user_config() {
    // surfaces before any bytes leave the host
    let security = usm::Security::new(b"user", b"").with_privacy(Cipher::Des, b"pw");
    let window = Arc::new(TimeWindow::new());
    let err = match crate::SyncSession::new_v3("127.0.0.1:1610", security, window, None, 1) {
        Ok(_) => panic!("configuration was accepted"),
        Err(e) => e,
    };
    assert_eq!(err, SnmpError::Config(ConfigError::PrivacyWithoutAuth));
}

#[cfg(feature = "async")]
#[tokio::test]
async fn tokio_session_binds() {
    let mut sess = crate::TokioSession::new_v2c("127.0.0.1:1610", b"public", 7)
        .await
        .unwrap();
    assert_eq!(sess.last_req_id(), 7);
    sess.set_last_req_id(100);
    assert_eq!(sess.last_req_id(), 100);
}

#[test]
fn discovery_gives_up_after_retries() {
    let security = usm::Security::new(b"simon", b"auth_password").with_auth_protocol(AuthProtocol::Sha1);
    let window = Arc::new(TimeWindow::new());
    let mut client = MessageProcessor::new(security, window).unwrap();
    let mut transport = ScriptedTransport {
        responses: vec![],
        exchanges: 0,
    };
    assert_eq!(
        discovery::discover(&mut client, &mut transport, "t:161", 100, 2).unwrap_err(),
        SnmpError::Discovery(DiscoveryError::Timeout)
    );
    assert_eq!(transport.exchanges, 3);
    assert_eq!(client.correlator().outstanding(), 0);
}
