use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use http::{HeaderMap, HeaderValue};
use hoyo_note_rs::{
    AccountContext, EventHandler, HttpTransport, NoteClient, NoteEvent, Region, RequestOutcome,
    ResourceSnapshot, ServerRegion, SignedRequest, TransportError, TransportResponse, project,
};

struct Reply {
    body: String,
    trace_id: Option<&'static str>,
}

/// Answers by URL path so the order of unrelated calls does not matter.
#[derive(Default)]
struct RoutedTransport {
    routes: Mutex<HashMap<&'static str, Vec<Reply>>>,
    seen: Mutex<Vec<SignedRequest>>,
}

impl RoutedTransport {
    fn route(self, path: &'static str, replies: Vec<Reply>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(path, replies.into_iter().rev().collect());
        self
    }

    fn requests_to(&self, path: &str) -> Vec<SignedRequest> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.url.path() == path)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HttpTransport for RoutedTransport {
    async fn execute(&self, request: &SignedRequest) -> Result<TransportResponse, TransportError> {
        self.seen.lock().unwrap().push(request.clone());
        let reply = self
            .routes
            .lock()
            .unwrap()
            .get_mut(request.url.path())
            .and_then(Vec::pop)
            .ok_or_else(|| TransportError::Transport(format!("no route for {}", request.url)))?;
        let mut headers = HeaderMap::new();
        if let Some(trace_id) = reply.trace_id {
            headers.insert("x-trace-id", HeaderValue::from_static(trace_id));
        }
        Ok(TransportResponse {
            status: 200,
            headers,
            body: Bytes::from(reply.body),
            url: request.url.clone(),
        })
    }
}

#[derive(Default)]
struct EventLog(Mutex<Vec<&'static str>>);

impl EventHandler for EventLog {
    fn handle(&self, event: &NoteEvent) {
        let label = match event {
            NoteEvent::RiskControl(_) => "risk",
            NoteEvent::Verification(step) if step.success => "step-ok",
            NoteEvent::Verification(_) => "step-failed",
            _ => return,
        };
        self.0.lock().unwrap().push(label);
    }
}

fn reply(body: &str) -> Reply {
    Reply {
        body: body.to_string(),
        trace_id: None,
    }
}

const FP_PATH: &str = "/device-fp/api/getFp";
const NOTE_PATH: &str = "/game_record/app/hkrpg/api/note";
const CREATE_PATH: &str = "/game_record/app/card/wapi/createVerification";
const VERIFY_PATH: &str = "/game_record/app/card/wapi/verifyVerification";
const CAPTCHA_PATH: &str = "/ajax.php";

const NOTE_OK: &str = r#"{"retcode":0,"message":"OK","data":{
    "current_stamina":100,"max_stamina":240,"stamina_recover_time":50400,
    "accepted_epedition_num":1,"total_expedition_num":4,
    "expeditions":[{"avatars":[],"status":"Ongoing","remaining_time":"120","name":"Run"}]}}"#;

fn header<'a>(request: &'a SignedRequest, name: &str) -> Option<&'a str> {
    request.headers.get(name).and_then(|value| value.to_str().ok())
}

#[tokio::test]
async fn domestic_risk_control_is_recovered_and_token_used_once() {
    let transport = Arc::new(
        RoutedTransport::default()
            .route(
                FP_PATH,
                vec![
                    reply(r#"{"retcode":0,"data":{"device_fp":"38d7f1a2b3c4d","code":200,"msg":"ok"}}"#),
                    reply(r#"{"retcode":0,"data":{"device_fp":"48d7f1a2b3c4e","code":200,"msg":"ok"}}"#),
                ],
            )
            .route(
                NOTE_PATH,
                vec![
                    Reply {
                        body: r#"{"retcode":1034,"message":"risk","data":null}"#.into(),
                        trace_id: Some("trace-1"),
                    },
                    reply(NOTE_OK),
                    reply(NOTE_OK),
                ],
            )
            .route(
                CREATE_PATH,
                vec![reply(
                    r#"{"retcode":0,"data":{"challenge":"chal-1","gt":"gt-1","new_captcha":1}}"#,
                )],
            )
            .route(
                CAPTCHA_PATH,
                vec![reply(
                    r#"geetest_1({"status":"success","data":{"result":"success","validate":"v-1"}})"#,
                )],
            )
            .route(
                VERIFY_PATH,
                vec![reply(r#"{"retcode":0,"data":{"challenge":"tok-1"}}"#)],
            ),
    );
    let events = Arc::new(EventLog::default());
    let client = NoteClient::builder()
        .with_transport(transport.clone())
        .with_event_handler(events.clone())
        .build()
        .unwrap();
    let account = AccountContext::new("100000001", ServerRegion::CnOfficial, "cookie_token=abc");

    let outcome = client.fetch_with_recovery(&account).await;
    let snapshot = outcome.success().expect("recovered fetch");
    assert_eq!(snapshot.note.current_stamina, 100);

    let create = &transport.requests_to(CREATE_PATH)[0];
    assert_eq!(header(create, "x-rpc-challenge_trace"), Some("trace-1"));
    assert_eq!(header(create, "x-rpc-device_fp"), Some("48d7f1a2b3c4e"));

    let verify = &transport.requests_to(VERIFY_PATH)[0];
    let body: serde_json::Value = serde_json::from_str(verify.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["geetest_challenge"], "chal-1");
    assert_eq!(body["geetest_seccode"], "v-1|jordan");

    let notes = transport.requests_to(NOTE_PATH);
    assert!(header(&notes[0], "x-rpc-chellange").is_none());
    assert_eq!(header(&notes[1], "x-rpc-chellange"), Some("tok-1"));
    assert!(!client.identity().has_challenge_token("100000001").unwrap());

    assert!(client.fetch_resource_snapshot(&account).await.is_success());
    let notes = transport.requests_to(NOTE_PATH);
    assert!(header(&notes[2], "x-rpc-chellange").is_none());
    assert_eq!(transport.requests_to(FP_PATH).len(), 2);

    let log = events.0.lock().unwrap().clone();
    assert_eq!(log, vec!["risk", "step-ok", "step-ok", "step-ok", "step-ok"]);
}

#[tokio::test]
async fn failed_solve_stops_the_pass() {
    let transport = Arc::new(
        RoutedTransport::default()
            .route(
                NOTE_PATH,
                vec![reply(r#"{"retcode":1034,"message":"risk","data":null}"#)],
            )
            .route(
                CREATE_PATH,
                vec![reply(r#"{"retcode":0,"data":{"challenge":"c","gt":"g","new_captcha":true}}"#)],
            )
            .route(
                CAPTCHA_PATH,
                vec![reply(r#"cb({"status":"success","data":{"result":"slide"}})"#)],
            ),
    );
    let client = NoteClient::builder()
        .with_transport(transport.clone())
        .build()
        .unwrap();
    let account = AccountContext::new("700000001", ServerRegion::Europe, "ltoken=abc");

    let outcome = client.fetch_with_recovery(&account).await;
    assert!(matches!(outcome, RequestOutcome::CaptchaFailure(_)));
    assert!(transport.requests_to(VERIFY_PATH).is_empty());
    assert_eq!(transport.requests_to(NOTE_PATH).len(), 1);
    assert!(transport.requests_to(FP_PATH).is_empty());
}

#[tokio::test]
async fn roles_are_fetched_without_signature() {
    let transport = Arc::new(RoutedTransport::default().route(
        "/binding/api/getUserGameRolesByLtoken",
        vec![reply(
            r#"{"retcode":0,"data":{"list":[{"region":"prod_official_asia","region_name":"Asia",
                "game_uid":"800000001","nickname":"Trailblazer","level":70}]}}"#,
        )],
    ));
    let client = NoteClient::builder()
        .with_transport(transport.clone())
        .build()
        .unwrap();

    let roles = client
        .fetch_roles(Region::Overseas, "ltoken=abc")
        .await
        .success()
        .unwrap();
    assert_eq!(roles[0].region, ServerRegion::Asia);
    assert_eq!(roles[0].game_uid, "800000001");

    let request = &transport.requests_to("/binding/api/getUserGameRolesByLtoken")[0];
    assert!(header(request, "ds").is_none());
    assert_eq!(header(request, "cookie"), Some("ltoken=abc"));
}

#[tokio::test]
async fn fetched_snapshot_projects_forward() {
    let transport = Arc::new(RoutedTransport::default().route(NOTE_PATH, vec![reply(NOTE_OK)]));
    let client = NoteClient::builder()
        .with_transport(transport)
        .build()
        .unwrap();
    let account = AccountContext::new("700000002", ServerRegion::America, "ltoken=abc");

    let snapshot: ResourceSnapshot = client
        .fetch_resource_snapshot(&account)
        .await
        .success()
        .unwrap();
    let later = project(&snapshot, snapshot.captured_at + Duration::seconds(1800));
    assert_eq!(later.note.current_stamina, 105);
    assert_eq!(later.note.expeditions[0].remaining_time, 0);
    assert!(later.captured_at <= Utc::now());
}

#[test]
fn device_id_survives_reopening_the_store() {
    let path = std::env::temp_dir().join(format!("hoyo-note-{}.redb", uuid::Uuid::new_v4()));
    let first = {
        let client = NoteClient::builder().with_store_path(&path).build().unwrap();
        client.device_id().unwrap()
    };
    let client = NoteClient::builder().with_store_path(&path).build().unwrap();
    assert_eq!(client.device_id().unwrap(), first);
    assert_eq!(first, first.to_lowercase());
    drop(client);
    let _ = std::fs::remove_file(&path);
}
