use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};

use fiscalflow_api::app::{build_app, services::AppServices};
use fiscalflow_infra::toolkit::scripted::responses;
use fiscalflow_infra::{FiscalConfig, FsArtifactStore, ScriptedToolkit, ToolkitCapabilities, ToolkitError};

const KEY_123: &str = "29250141986662000160550010000001231123456781";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    toolkit: Arc<ScriptedToolkit>,
    storage: tempfile::TempDir,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(ScriptedToolkit::new().with_capabilities(ToolkitCapabilities::full())).await
    }

    async fn spawn_with(toolkit: ScriptedToolkit) -> Self {
        let storage = tempfile::tempdir().expect("failed to create storage dir");
        let config = FiscalConfig {
            issuer_cnpj: "41986662000160".to_string(),
            storage_root: storage.path().to_path_buf(),
            ..FiscalConfig::default()
        };
        let toolkit = Arc::new(toolkit);
        let store = Arc::new(FsArtifactStore::open(storage.path().to_path_buf()).expect("failed to open store"));

        // Same router as prod, scripted toolkit, ephemeral port.
        let app = build_app(AppServices::new(&config, toolkit.clone(), store));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            handle,
            toolkit,
            storage,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn document(number: u32) -> Value {
    json!({
        "ide": {
            "cUF": 29, "cNF": "12345678", "natOp": "VENDA", "mod": 55, "serie": 1, "nNF": number,
            "dhEmi": "2025-01-15T10:00:00-03:00", "tpNF": 1, "idDest": 1, "cMunFG": 2927408,
            "tpImp": 1, "tpEmis": 1, "finNFe": 1, "indFinal": 1, "indPres": 1, "procEmi": 0,
            "verProc": "1.0"
        },
        "emit": {
            "CNPJ": "41986662000160", "xNome": "EMITENTE LTDA", "IE": "123456789", "CRT": 3,
            "enderEmit": {"xLgr": "Rua A", "nro": "1", "xBairro": "Centro", "cMun": 2927408,
                          "xMun": "Salvador", "UF": "BA", "CEP": "40000000"}
        },
        "dest": {"CNPJ": "11222333000181", "xNome": "CLIENTE", "indIEDest": 9},
        "itens": [
            {"nItem": 1, "prod": {"cProd": "A", "xProd": "Produto A", "NCM": "22021000",
              "CFOP": 5102, "uCom": "UN", "qCom": 3, "vUnCom": 0.1, "vProd": 0.3},
             "imposto": {"ICMS": {"orig": 0, "CST": "00", "vBC": 0.3, "pICMS": 18, "vICMS": 0.05},
               "IBSCBS": {"CST": "000", "cClassTrib": "000001", "vBC": 0.3,
                  "gIBSUF": {"pIBSUF": 0.1, "vIBSUF": 0.01},
                  "gCBS": {"pCBS": 0.9, "vCBS": 0.01}}}}
        ],
        "totais": {"ICMSTot": {"vBC": 0.3, "vICMS": 0.05, "vProd": 0.3, "vNF": 0.3}}
    })
}

fn cancellation() -> Value {
    json!({"chave": KEY_123, "protocolo": "129250000000001"})
}

#[tokio::test]
async fn health_and_ping_answer_pong() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    for path in ["/health", "/ping"] {
        let res = client.get(srv.url(path)).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body, json!({"status": "ok", "msg": "pong"}));
    }
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let srv = TestServer::spawn().await;
    let res = reqwest::Client::new()
        .get(srv.url("/nfe/nothing-here"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn single_document_is_authorized_and_proof_lands_on_disk() {
    let srv = TestServer::spawn().await;
    let res = reqwest::Client::new()
        .post(srv.url("/nfe/emitir"))
        .json(&document(123))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["authorized"], 1);
    assert_eq!(body["items"][0]["status"], "authorized");
    assert_eq!(body["items"][0]["key"], KEY_123);

    let proof = srv
        .storage
        .path()
        .join("authorized")
        .join(format!("NFe-{KEY_123}-procNFe.xml"));
    assert!(proof.exists(), "missing {}", proof.display());
}

#[tokio::test]
async fn batch_reports_partial_failure() {
    let srv = TestServer::spawn().await;
    let res = reqwest::Client::new()
        .post(srv.url("/nfe/emitir"))
        .json(&json!({"documents": [document(1), document(2), {"ide": {}}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["total"], 3);
    assert_eq!(body["authorized"], 2);
    assert_eq!(body["errors"], 1);
    assert_eq!(body["items"][2]["status"], "build_error");
    assert_eq!(body["items"][2]["position"], 2);
}

#[tokio::test]
async fn nothing_authorized_is_422() {
    let srv = TestServer::spawn().await;
    let res = reqwest::Client::new()
        .post(srv.url("/nfe/emitir"))
        .json(&json!([{"emit": {}}]))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["authorized"], 0);
    assert_eq!(srv.toolkit.transmissions(), 0);
}

#[tokio::test]
async fn malformed_emission_bodies_are_400() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let empty = client.post(srv.url("/nfe/emitir")).send().await.unwrap();
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    let body: Value = empty.json().await.unwrap();
    assert_eq!(body["error"], "empty_body");

    let garbage = client
        .post(srv.url("/nfe/emitir"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(garbage.status(), StatusCode::BAD_REQUEST);

    let no_documents = client
        .post(srv.url("/nfe/emitir"))
        .json(&json!([]))
        .send()
        .await
        .unwrap();
    assert_eq!(no_documents.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancellation_statuses() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/nfe/cancelar"))
        .json(&cancellation())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "registered");
    assert!(body["proof_path"].as_str().unwrap().ends_with(&format!("canc-{KEY_123}-procEvento.xml")));

    // Already stored: answered without transmitting.
    let again: Value = client
        .post(srv.url("/nfe/cancelar"))
        .json(&cancellation())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["cached"], true);
    assert_eq!(srv.toolkit.transmissions(), 1);

    let short = client
        .post(srv.url("/nfe/cancelar"))
        .json(&json!({"chave": KEY_123, "protocolo": "129250000000001", "just": "curta"}))
        .send()
        .await
        .unwrap();
    assert_eq!(short.status(), StatusCode::BAD_REQUEST);
    let body: Value = short.json().await.unwrap();
    assert_eq!(body["status"], "validation_error");

    let missing_fields = client
        .post(srv.url("/nfe/cancelar"))
        .json(&json!({"chave": KEY_123}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing_fields.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn correction_rejection_and_transport_failure() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let body = json!({"chave": KEY_123, "texto": "Correcao do endereco do destinatario"});

    srv.toolkit.reply_to_event(Ok(responses::event(494)));
    let rejected = client.post(srv.url("/nfe/cce")).json(&body).send().await.unwrap();
    assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let rejected: Value = rejected.json().await.unwrap();
    assert_eq!(rejected["status"], "rejected");
    assert_eq!(rejected["sequence"], 1);

    srv.toolkit
        .reply_to_event(Err(ToolkitError::failed("transmit_event", "connection reset")));
    let failed = client.post(srv.url("/nfe/cce")).json(&body).send().await.unwrap();
    assert_eq!(failed.status(), StatusCode::BAD_GATEWAY);

    let ok = client.post(srv.url("/nfe/cce")).json(&body).send().await.unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    let ok: Value = ok.json().await.unwrap();
    assert!(ok["rendered_proof_path"].as_str().unwrap().ends_with(&format!("cce-{KEY_123}-001.pdf")));
}

#[tokio::test]
async fn range_voidance() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/nfe/inutilizar"))
        .json(&json!({"ano": "25", "serie": 1, "ini": 10, "fim": 12}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["subject"], "ID29254198666200016055001000000010000000012");

    let inverted = client
        .post(srv.url("/nfe/inutilizar"))
        .json(&json!({"ano": 25, "serie": 1, "ini": 12, "fim": 10}))
        .send()
        .await
        .unwrap();
    assert_eq!(inverted.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn queries() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(srv.url(&format!("/nfe/consultar/{KEY_123}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "answered");
    assert_eq!(body["report"]["key"], KEY_123);

    let bad_key = client.get(srv.url("/nfe/consultar/123")).send().await.unwrap();
    assert_eq!(bad_key.status(), StatusCode::BAD_REQUEST);
    let body: Value = bad_key.json().await.unwrap();
    assert_eq!(body["error"], "invalid_key");

    let status: Value = client
        .get(srv.url("/nfe/status?uf=SP"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "in_operation");

    srv.toolkit.reply_to_status_query(Ok(responses::service_status(108)));
    let down: Value = client
        .get(srv.url("/nfe/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(down["status"], "unavailable");
}

#[tokio::test]
async fn cancellation_completes_after_the_client_gives_up() {
    let srv = TestServer::spawn_with(
        ScriptedToolkit::new()
            .with_capabilities(ToolkitCapabilities::full())
            .with_latency(Duration::from_millis(400)),
    )
    .await;
    let impatient = reqwest::Client::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let res = impatient.post(srv.url("/nfe/cancelar")).json(&cancellation()).send().await;
    assert!(res.is_err(), "client should time out before the authority answers");

    tokio::time::sleep(Duration::from_millis(1000)).await;
    let proof = srv
        .storage
        .path()
        .join("events")
        .join("cancellation")
        .join(format!("canc-{KEY_123}-procEvento.xml"));
    assert!(proof.exists(), "missing {}", proof.display());
    assert_eq!(srv.toolkit.transmissions(), 1);
}

#[tokio::test]
async fn danfe_is_served_as_pdf() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let before = client
        .get(srv.url(&format!("/nfe/danfe/{KEY_123}")))
        .send()
        .await
        .unwrap();
    assert_eq!(before.status(), StatusCode::NOT_FOUND);
    let body: Value = before.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let bad_key = client.get(srv.url("/nfe/danfe/123")).send().await.unwrap();
    assert_eq!(bad_key.status(), StatusCode::BAD_REQUEST);

    let emitted = client
        .post(srv.url("/nfe/emitir"))
        .json(&document(123))
        .send()
        .await
        .unwrap();
    assert_eq!(emitted.status(), StatusCode::OK);

    // Rendered again from the proof when the stored PDF is gone.
    let rendered = srv
        .storage
        .path()
        .join("rendered-proof")
        .join("danfe")
        .join(format!("DANFE-{KEY_123}.pdf"));
    std::fs::remove_file(&rendered).unwrap();

    let res = client
        .get(srv.url(&format!("/nfe/danfe/{KEY_123}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "application/pdf");
    assert_eq!(
        res.headers()["content-disposition"],
        format!("inline; filename=\"DANFE-{KEY_123}.pdf\"").as_str()
    );
    let pdf = res.bytes().await.unwrap();
    assert!(pdf.starts_with(b"%PDF"));
    assert!(rendered.exists());
}

#[tokio::test]
async fn proof_is_rebuilt_without_transmitting() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let unknown = client
        .post(srv.url(&format!("/nfe/reprocessar/{KEY_123}")))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::BAD_GATEWAY);
    let body: Value = unknown.json().await.unwrap();
    assert_eq!(body["status"], "technical_error");

    client
        .post(srv.url("/nfe/emitir"))
        .json(&document(123))
        .send()
        .await
        .unwrap();
    let proof = srv
        .storage
        .path()
        .join("authorized")
        .join(format!("NFe-{KEY_123}-procNFe.xml"));
    std::fs::remove_file(&proof).unwrap();

    let res = client
        .post(srv.url(&format!("/nfe/reprocessar/{KEY_123}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "authorized");
    assert_eq!(body["cached"], false);
    assert!(proof.exists());
    assert_eq!(srv.toolkit.transmissions(), 1);
}
