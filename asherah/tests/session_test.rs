use asherah::kms::StaticKeyManagementService;
use asherah::metastore::{InMemoryMetastore, SuffixedMetastore};
use asherah::persistence::{LoaderFn, StorerFn};
use asherah::policy::CryptoPolicy;
use asherah::session::SessionFactory;
use asherah::{DataRowRecord, Error, Metastore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

const STATIC_MASTER_KEY: &[u8; 32] = b"thisIsAStaticMasterKeyForTesting";

fn static_kms() -> Arc<StaticKeyManagementService> {
    Arc::new(StaticKeyManagementService::new(STATIC_MASTER_KEY.to_vec()).expect("kms"))
}

fn factory_on(metastore: Arc<dyn Metastore>) -> SessionFactory {
    SessionFactory::new("prod-x", "svc-a", metastore, static_kms(), CryptoPolicy::new())
}

#[test]
fn static_kms_round_trip() {
    let factory = factory_on(Arc::new(InMemoryMetastore::new()));

    let session = factory.get_session("shopper-1").expect("session");
    let drr = session.encrypt(b"mysupersecretpayload").expect("encrypt");

    assert_eq!(
        drr.key.parent_key_meta.as_ref().expect("parent meta").id,
        "_IK_shopper-1_svc-a_prod-x"
    );

    // A fresh session on the same factory decrypts it.
    let fresh = factory.get_session("shopper-1").expect("fresh session");
    assert_eq!(
        fresh.decrypt(&drr).expect("decrypt"),
        b"mysupersecretpayload"
    );
}

#[test]
fn records_decrypt_across_factories_sharing_a_metastore() {
    let metastore: Arc<dyn Metastore> = Arc::new(InMemoryMetastore::new());

    let writer = factory_on(Arc::clone(&metastore));
    let drr = writer
        .get_session("shopper-1")
        .expect("writer session")
        .encrypt(b"cross-process payload")
        .expect("encrypt");

    // A separate factory stands in for another process: nothing is shared
    // but the metastore and the master key.
    let reader = factory_on(metastore);
    let decrypted = reader
        .get_session("shopper-1")
        .expect("reader session")
        .decrypt(&drr)
        .expect("decrypt");
    assert_eq!(decrypted, b"cross-process payload");
}

#[test]
fn revoked_intermediate_key_still_decrypts_existing_records() {
    let metastore = Arc::new(InMemoryMetastore::new());

    let writer = factory_on(Arc::clone(&metastore) as Arc<dyn Metastore>);
    let drr = writer
        .get_session("shopper-1")
        .expect("session")
        .encrypt(b"P")
        .expect("encrypt");

    // Revoke the intermediate key row the record points at.
    assert!(metastore.mark_revoked("_IK_shopper-1_svc-a_prod-x", drr.key.created));

    // A new factory has no cached keys, so it sees the revoked row; existing
    // records must still decrypt (revocation only stops new encryptions
    // under the key).
    let reader = factory_on(Arc::clone(&metastore) as Arc<dyn Metastore>);
    let decrypted = reader
        .get_session("shopper-1")
        .expect("reader session")
        .decrypt(&drr)
        .expect("decrypt");
    assert_eq!(decrypted, b"P");
}

#[test]
fn region_suffix_isolates_writers_from_unsuffixed_readers() {
    let shared = Arc::new(InMemoryMetastore::new());

    let suffixed: Arc<dyn Metastore> = Arc::new(SuffixedMetastore::new(
        Arc::clone(&shared),
        "us-west-2",
    ));
    let writer = factory_on(suffixed);
    let drr = writer
        .get_session("shopper-1")
        .expect("session")
        .encrypt(b"regional payload")
        .expect("encrypt");

    // The physical rows carry the suffix.
    assert!(shared
        .load_latest("_SK_svc-a_prod-x_us-west-2")
        .expect("load")
        .is_some());
    assert!(shared.load_latest("_SK_svc-a_prod-x").expect("load").is_none());

    // A reader with the suffix disabled cannot resolve the keys.
    let reader = factory_on(Arc::clone(&shared) as Arc<dyn Metastore>);
    assert!(matches!(
        reader
            .get_session("shopper-1")
            .expect("session")
            .decrypt(&drr),
        Err(Error::NotFound(_))
    ));

    // A reader with the same suffix can.
    let suffixed_reader = factory_on(Arc::new(SuffixedMetastore::new(
        Arc::clone(&shared),
        "us-west-2",
    )) as Arc<dyn Metastore>);
    assert_eq!(
        suffixed_reader
            .get_session("shopper-1")
            .expect("session")
            .decrypt(&drr)
            .expect("decrypt"),
        b"regional payload"
    );
}

#[test]
fn tampered_records_fail_closed() {
    let factory = factory_on(Arc::new(InMemoryMetastore::new()));
    let session = factory.get_session("shopper-1").expect("session");

    let drr = session.encrypt(b"integrity matters").expect("encrypt");

    // Payload ciphertext.
    let mut tampered = drr.clone();
    tampered.data[0] ^= 0x01;
    assert!(matches!(session.decrypt(&tampered), Err(Error::Crypto(_))));

    // Payload nonce (the trailing 12 bytes).
    let mut tampered = drr.clone();
    let last = tampered.data.len() - 1;
    tampered.data[last] ^= 0x01;
    assert!(matches!(session.decrypt(&tampered), Err(Error::Crypto(_))));

    // The wrapped data row key.
    let mut tampered = drr.clone();
    tampered.key.encrypted_key[0] ^= 0x01;
    assert!(matches!(session.decrypt(&tampered), Err(Error::Crypto(_))));

    // The untampered record still decrypts.
    assert_eq!(session.decrypt(&drr).expect("decrypt"), b"integrity matters");
}

#[test]
fn json_wire_form_round_trips_between_factories() {
    let metastore: Arc<dyn Metastore> = Arc::new(InMemoryMetastore::new());

    let writer = factory_on(Arc::clone(&metastore));
    let bytes = writer
        .get_session("shopper-1")
        .expect("session")
        .encrypt_to_json(b"wire payload")
        .expect("encrypt");

    // The byte form is the conventional JSON envelope.
    let value: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
    assert!(value["Data"].is_string());
    assert!(value["Key"]["Created"].is_i64());
    assert_eq!(
        value["Key"]["ParentKeyMeta"]["KeyId"],
        "_IK_shopper-1_svc-a_prod-x"
    );

    let reader = factory_on(metastore);
    assert_eq!(
        reader
            .get_session("shopper-1")
            .expect("session")
            .decrypt_from_json(&bytes)
            .expect("decrypt"),
        b"wire payload"
    );
}

#[test]
fn store_and_load_through_closure_persistence() {
    let factory = factory_on(Arc::new(InMemoryMetastore::new()));
    let session = factory.get_session("shopper-1").expect("session");

    let backing = Arc::new(Mutex::new(HashMap::<String, DataRowRecord>::new()));

    let storer = {
        let backing = Arc::clone(&backing);
        StorerFn::new(move |drr: &DataRowRecord| {
            let mut map = backing.lock().expect("lock");
            let key = format!("record-{}", map.len());
            map.insert(key.clone(), drr.clone());
            Ok(key)
        })
    };
    let loader = {
        let backing = Arc::clone(&backing);
        LoaderFn::new(move |key: &String| Ok(backing.lock().expect("lock").get(key).cloned()))
    };

    let key = session.store(b"persisted payload", &storer).expect("store");
    assert_eq!(
        session.load(&key, &loader).expect("load"),
        b"persisted payload"
    );
    assert!(matches!(
        session.load(&"unknown".to_string(), &loader),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn a_session_is_safe_to_share_across_threads() {
    let factory = Arc::new(factory_on(Arc::new(InMemoryMetastore::new())));
    let session = Arc::new(factory.get_session("shopper-1").expect("session"));

    let handles: Vec<_> = (0..8_u8)
        .map(|i| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                for round in 0..16_u8 {
                    let payload = vec![i, round, 0xaa];
                    let drr = session.encrypt(&payload).expect("encrypt");
                    assert_eq!(session.decrypt(&drr).expect("decrypt"), payload);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker thread");
    }
}

#[test]
fn all_payload_shapes_round_trip() {
    let factory = factory_on(Arc::new(InMemoryMetastore::new()));
    let session = factory.get_session("shopper-1").expect("session");

    let payloads: Vec<Vec<u8>> = vec![
        Vec::new(),
        vec![0_u8],
        vec![0xff; 1],
        (0..=255).collect(),
        vec![0x42; 64 * 1024],
    ];

    for payload in payloads {
        let drr = session.encrypt(&payload).expect("encrypt");
        assert_eq!(session.decrypt(&drr).expect("decrypt"), payload);
    }
}
