use std::sync::Arc;

use tempfile::TempDir;
use wecom_relay_channels::{
    compute_signature, CallbackCipher, CallbackController, CallbackErrorKind, CallbackResponse,
};
use wecom_relay_core::{Configuration, MsgType, SecretCipher};
use wecom_relay_storage::{ConfigStore, MessageQuery, MessageStore, SqliteStore};

const AES_KEY: &str = "cGCVnNJRgRu6wDgo7gxG2diBovGnRQq1Tqy4Rm4V4qF";
const TOKEN: &str = "QDG6eK";
const CORP: &str = "wwCORP";
const TS: &str = "1700000000";
const NONCE: &str = "1372623149";
const TEXT_XML: &str = "<xml><ToUserName>X</ToUserName><FromUserName>Y</FromUserName>\
    <MsgType>text</MsgType><Content>hi</Content><CreateTime>1700000000</CreateTime>\
    <MsgId>123</MsgId></xml>";

struct Harness {
    _dir: TempDir,
    store: Arc<SqliteStore>,
    controller: CallbackController,
    cipher: CallbackCipher,
    code: String,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(&dir.path().join("relay.db")).unwrap());
    let secrets = SecretCipher::new("integration-password").unwrap();

    let config = Configuration::new_callback(CORP, TOKEN, secrets.encrypt(AES_KEY).unwrap());
    store.save(&config).unwrap();

    let controller = CallbackController::new(store.clone(), store.clone(), secrets);
    Harness {
        _dir: dir,
        store,
        controller,
        cipher: CallbackCipher::from_encoding_aes_key(AES_KEY).unwrap(),
        code: config.code,
    }
}

fn sealed_body(cipher: &CallbackCipher, xml: &str) -> (String, String) {
    let encrypted = cipher.encrypt_message(xml, CORP).unwrap();
    let signature = compute_signature(TOKEN, TS, NONCE, &encrypted);
    (format!("{{\"Encrypt\":\"{}\"}}", encrypted), signature)
}

#[tokio::test]
async fn url_verification_then_message_intake() {
    let h = harness();

    let echostr = h.cipher.encrypt_message("5927782489442352469", CORP).unwrap();
    let sig = compute_signature(TOKEN, TS, NONCE, &echostr);
    let echo = h
        .controller
        .handle_verification(&h.code, &sig, TS, NONCE, &echostr)
        .unwrap();
    assert_eq!(echo, "5927782489442352469");

    let (body, sig) = sealed_body(&h.cipher, TEXT_XML);
    let response: CallbackResponse<_> = h
        .controller
        .handle_message(&h.code, &body, &sig, TS, NONCE)
        .await
        .into();
    assert!(response.success);
    let msg = response.data.unwrap();
    assert_eq!(msg.msg_type, MsgType::Text);
    assert_eq!(msg.content.as_deref(), Some("hi"));
    assert_eq!(msg.from_user, "Y");

    let page = h.store.query(&MessageQuery::for_config(h.code.clone())).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.messages[0].message_id, "123");
    assert_eq!(page.messages[0].created_date, "2023-11-15");
}

#[tokio::test]
async fn tampered_signature_or_ciphertext_is_rejected() {
    let h = harness();
    let encrypted = h.cipher.encrypt_message(TEXT_XML, CORP).unwrap();
    let sig = compute_signature(TOKEN, TS, NONCE, &encrypted);

    let mut bad_sig = sig.clone().into_bytes();
    bad_sig[5] = if bad_sig[5] == b'0' { b'1' } else { b'0' };
    let bad_sig = String::from_utf8(bad_sig).unwrap();
    let err = h
        .controller
        .handle_message(&h.code, &encrypted, &bad_sig, TS, NONCE)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), CallbackErrorKind::Signature);

    // Same signature over a modified payload.
    let mut flipped = encrypted.clone().into_bytes();
    flipped[10] = if flipped[10] == b'A' { b'B' } else { b'A' };
    let flipped = String::from_utf8(flipped).unwrap();
    let err = h
        .controller
        .handle_message(&h.code, &flipped, &sig, TS, NONCE)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), CallbackErrorKind::Signature);
    assert_eq!(err.status_code(), 400);

    let stats = h.store.stats(&h.code).unwrap();
    assert_eq!(stats.total_messages, 0);
}

#[tokio::test]
async fn redelivery_is_idempotent_in_sqlite() {
    let h = harness();
    for _ in 0..3 {
        let (body, sig) = sealed_body(&h.cipher, TEXT_XML);
        h.controller
            .handle_message(&h.code, &body, &sig, TS, NONCE)
            .await
            .unwrap();
    }
    let stats = h.store.stats(&h.code).unwrap();
    assert_eq!(stats.total_messages, 1);
    assert_eq!(stats.unread_count, 1);
}

#[tokio::test]
async fn disabled_configuration_rejects_both_flows() {
    let h = harness();
    let mut config = h.store.get_by_code(&h.code).unwrap().unwrap();
    config.callback_enabled = false;
    config.encrypted_encoding_aes_key = Some("garbage".to_string());
    h.store.save(&config).unwrap();

    let err = h
        .controller
        .handle_verification(&h.code, "sig", TS, NONCE, "echo")
        .unwrap_err();
    assert_eq!(err.kind(), CallbackErrorKind::Configuration);

    let (body, sig) = sealed_body(&h.cipher, TEXT_XML);
    let err = h
        .controller
        .handle_message(&h.code, &body, &sig, TS, NONCE)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), CallbackErrorKind::Configuration);
}
