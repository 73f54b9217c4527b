//! End-to-end API tests: the real router bound to an ephemeral port, a
//! scripted scheduler standing in for the cluster, and a temporary work
//! directory standing in for scratch storage.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use expressdiff::core::config::PipelineConfig;
use expressdiff::core::controller::RunController;
use expressdiff::core::error::PipelineResult;
use expressdiff::core::slurm::{JobState, SchedulerGateway};
use expressdiff::core::stage::Stage;
use expressdiff::interfaces::web::api_router;

struct FakeScheduler {
    statuses: Mutex<HashMap<String, JobState>>,
    next_id: AtomicU64,
}

impl FakeScheduler {
    fn new() -> Self {
        Self {
            statuses: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(5000),
        }
    }

    fn set_status(&self, job_id: &str, state: JobState) {
        self.statuses
            .lock()
            .unwrap()
            .insert(job_id.to_string(), state);
    }
}

#[async_trait]
impl SchedulerGateway for FakeScheduler {
    async fn submit(&self, _script: &Path) -> PipelineResult<String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.statuses
            .lock()
            .unwrap()
            .insert(id.clone(), JobState::Running);
        Ok(id)
    }

    async fn status(&self, job_id: &str) -> PipelineResult<JobState> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(job_id)
            .copied()
            .unwrap_or(JobState::Unknown))
    }

    async fn cancel(&self, _job_id: &str) {}

    async fn accounts(&self) -> Vec<String> {
        vec!["acct-A".to_string(), "acct-B".to_string()]
    }
}

struct TestServer {
    base: String,
    work_dir: PathBuf,
    scheduler: Arc<FakeScheduler>,
    client: reqwest::Client,
    _tmp: tempfile::TempDir,
}

impl TestServer {
    async fn spawn() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let install = tmp.path().join("install");
        let work = tmp.path().join("work");
        let templates = install.join("slurm_templates");
        fs::create_dir_all(&templates).unwrap();
        for stage in Stage::ALL {
            // Same shape as the shipped templates: assign from the
            // placeholder, then dereference the shell variable.
            let body = format!(
                "#!/bin/bash\n#SBATCH --account={{ACCOUNT}}\n#SBATCH --job-name={}_{{RUN_ID}}\n\
                 RUN_DIR={{RUN_DIR}}\nBASE_DIR={{BASE_DIR}}\nADAPTER={{ADAPTER_TYPE}}\n\
                 cd \"${{RUN_DIR}}\"\necho \"${{BASE_DIR}}\" \"${{ADAPTER}}\"\n",
                stage.as_str()
            );
            fs::write(templates.join(stage.template_name()), body).unwrap();
        }

        let scheduler = Arc::new(FakeScheduler::new());
        let controller = Arc::new(
            RunController::new(
                PipelineConfig::new(install, work.clone()),
                scheduler.clone() as Arc<dyn SchedulerGateway>,
            )
            .unwrap(),
        );

        let app = api_router(controller);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            work_dir: work,
            scheduler,
            client: reqwest::Client::new(),
            _tmp: tmp,
        }
    }

    async fn get(&self, path: &str) -> (reqwest::StatusCode, Value) {
        let resp = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    async fn post(&self, path: &str, body: Value) -> (reqwest::StatusCode, Value) {
        let resp = self
            .client
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    async fn create_run(&self) -> String {
        let (status, body) = self
            .post(
                "/runs",
                serde_json::json!({"name": "r1", "account": "acct-A"}),
            )
            .await;
        assert!(status.is_success(), "create_run failed: {body}");
        body["run_id"].as_str().unwrap().to_string()
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.work_dir.join("runs").join(run_id)
    }

    fn seed_raw(&self, run_id: &str) {
        let raw = self.run_dir(run_id).join("raw");
        fs::write(raw.join("sample1_1.fq.gz"), b"").unwrap();
        fs::write(raw.join("sample1_2.fq.gz"), b"").unwrap();
    }
}

#[tokio::test]
async fn create_and_list_runs() {
    let server = TestServer::spawn().await;
    let run_id = server.create_run().await;

    assert!(server.run_dir(&run_id).join("run_state.json").is_file());

    let (status, body) = server.get("/runs").await;
    assert_eq!(status, 200);
    let runs = body.as_array().unwrap();
    assert_eq!(runs.len(), 1);
    let stages = runs[0]["stages"].as_object().unwrap();
    assert_eq!(stages.len(), 6);
    for stage in Stage::ALL {
        assert_eq!(stages[stage.as_str()]["status"], "pending");
    }
}

#[tokio::test]
async fn dependency_gating_names_the_missing_stage() {
    let server = TestServer::spawn().await;
    let run_id = server.create_run().await;
    server.seed_raw(&run_id);

    let (status, body) = server
        .post(
            &format!("/runs/{run_id}/stages/trim"),
            serde_json::json!({"account": "acct-A"}),
        )
        .await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("qc_raw"));
}

#[tokio::test]
async fn rerun_guard_conflicts_then_confirms() {
    let server = TestServer::spawn().await;
    let run_id = server.create_run().await;
    server.seed_raw(&run_id);
    let flag = server.run_dir(&run_id).join(Stage::QcRaw.done_flag());
    fs::write(&flag, b"").unwrap();

    let (status, body) = server
        .post(
            &format!("/runs/{run_id}/stages/qc_raw"),
            serde_json::json!({"account": "acct-A"}),
        )
        .await;
    assert_eq!(status, 409);
    assert!(body["error"].as_str().unwrap().contains("confirm_rerun"));
    assert!(flag.exists());

    let (status, body) = server
        .post(
            &format!("/runs/{run_id}/stages/qc_raw"),
            serde_json::json!({"account": "acct-A", "confirm_rerun": true}),
        )
        .await;
    assert_eq!(status, 200, "{body}");
    assert!(!flag.exists());
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let (status, body) = server
        .get(&format!("/runs/{run_id}/stages/qc_raw/status"))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["job_id"], Value::String(job_id));
    assert_eq!(body["status"], "running");
}

#[tokio::test]
async fn completed_job_without_flag_reports_failed() {
    let server = TestServer::spawn().await;
    let run_id = server.create_run().await;
    server.seed_raw(&run_id);

    let (status, body) = server
        .post(
            &format!("/runs/{run_id}/stages/qc_raw"),
            serde_json::json!({"account": "acct-A"}),
        )
        .await;
    assert_eq!(status, 200);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    server.scheduler.set_status(&job_id, JobState::Completed);
    let (status, body) = server
        .get(&format!("/runs/{run_id}/stages/qc_raw/status"))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "failed");
}

#[tokio::test]
async fn upload_routes_by_extension_and_rejects_the_rest() {
    let server = TestServer::spawn().await;
    let run_id = server.create_run().await;

    let form = reqwest::multipart::Form::new()
        .part(
            "files",
            reqwest::multipart::Part::bytes(b"fastq".to_vec()).file_name("a_1.fq.gz"),
        )
        .part(
            "files",
            reqwest::multipart::Part::bytes(b"fasta".to_vec()).file_name("ref.fa"),
        )
        .part(
            "files",
            reqwest::multipart::Part::bytes(b"csv".to_vec()).file_name("meta.csv"),
        )
        .part(
            "files",
            reqwest::multipart::Part::bytes(b"nope".to_vec()).file_name("bad.exe"),
        );

    let resp = server
        .client
        .post(format!("{}/runs/{run_id}/upload", server.base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].as_str().unwrap().contains("bad.exe"));

    let run_dir = server.run_dir(&run_id);
    assert!(run_dir.join("raw").join("a_1.fq.gz").is_file());
    assert!(run_dir.join("reference").join("ref.fa").is_file());
    assert!(run_dir.join("metadata").join("meta.csv").is_file());
    assert!(!run_dir.join("raw").join("bad.exe").exists());
}

#[tokio::test]
async fn submitted_script_contains_substituted_values() {
    let server = TestServer::spawn().await;
    let run_id = server.create_run().await;
    server.seed_raw(&run_id);
    let flag = server.run_dir(&run_id).join(Stage::QcRaw.done_flag());
    fs::write(&flag, b"").unwrap();

    let resp = server
        .client
        .put(format!("{}/runs/{run_id}/adapter", server.base))
        .json(&serde_json::json!({"adapter_type": "TruSeq3-PE"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let (status, _body) = server
        .post(
            &format!("/runs/{run_id}/stages/trim"),
            serde_json::json!({"account": "acct-A"}),
        )
        .await;
    assert_eq!(status, 200);

    let script_path = server
        .work_dir
        .join("generated_slurm")
        .join(format!("trim_{run_id}.script"));
    let script = fs::read_to_string(&script_path).unwrap();
    assert!(script.contains(&run_id));
    assert!(script.contains(&*server.work_dir.to_string_lossy()));
    assert!(script.contains("TruSeq3-PE"));
    assert!(!script.contains("{ACCOUNT}"));
    assert!(!script.contains("{RUN_ID}"));
    // Shell dereferences survive rendering intact.
    assert!(script.contains("cd \"${RUN_DIR}\""));
    assert!(!script.contains("$/"));
}

#[tokio::test]
async fn unknown_stage_and_file_type_boundaries() {
    let server = TestServer::spawn().await;
    let run_id = server.create_run().await;

    let (status, _) = server
        .get(&format!("/runs/{run_id}/stages/bogus/status"))
        .await;
    assert_eq!(status, 404);

    fs::create_dir_all(server.run_dir(&run_id).join("deseq2")).unwrap();
    let (status, _) = server
        .get(&format!("/runs/{run_id}/deseq2-download/everything"))
        .await;
    assert_eq!(status, 400);

    let (status, _) = server.get("/runs/does-not-exist").await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn delete_run_twice_succeeds() {
    let server = TestServer::spawn().await;
    let run_id = server.create_run().await;

    let resp = server
        .client
        .delete(format!("{}/runs/{run_id}", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(!server.run_dir(&run_id).exists());

    let resp = server
        .client
        .delete(format!("{}/runs/{run_id}", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn health_stages_and_accounts_endpoints() {
    let server = TestServer::spawn().await;

    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].as_str().is_some());

    let (status, body) = server.get("/stages").await;
    assert_eq!(status, 200);
    let stages: Vec<&str> = body["stages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap())
        .collect();
    assert_eq!(
        stages,
        ["qc_raw", "trim", "qc_trimmed", "star", "featurecounts", "deseq2"]
    );

    let (status, body) = server.get("/accounts").await;
    assert_eq!(status, 200);
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn invalid_adapter_type_is_rejected_at_the_surface() {
    let server = TestServer::spawn().await;
    let run_id = server.create_run().await;

    let resp = server
        .client
        .put(format!("{}/runs/{run_id}/adapter", server.base))
        .json(&serde_json::json!({"adapter_type": "NotAnAdapter"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn samples_endpoint_reports_pairing() {
    let server = TestServer::spawn().await;
    let run_id = server.create_run().await;
    server.seed_raw(&run_id);
    fs::write(
        server.run_dir(&run_id).join("raw").join("lonely_1.fq.gz"),
        b"",
    )
    .unwrap();

    let (status, body) = server.get(&format!("/runs/{run_id}/samples")).await;
    assert_eq!(status, 200);
    assert_eq!(body["total_files"], 3);
    let pairs = body["valid_pairs"].as_array().unwrap();
    assert_eq!(pairs.len(), 2);
    let lonely = pairs
        .iter()
        .find(|p| p["sample_name"] == "lonely")
        .unwrap();
    assert_eq!(lonely["valid"], false);
}

#[tokio::test]
async fn deseq2_results_surface_summary_and_degs() {
    let server = TestServer::spawn().await;
    let run_id = server.create_run().await;
    let de = server.run_dir(&run_id).join("deseq2");
    fs::write(de.join("summary.txt"), "Significant DEGs: 1\n").unwrap();
    fs::write(
        de.join("significant_degs.csv"),
        "gene,baseMean,log2FoldChange,lfcSE,stat,pvalue,padj\nBRCA1,10.55555,1.23456,0.1,2.5,0.001,0.01\n",
    )
    .unwrap();

    let (status, body) = server.get(&format!("/runs/{run_id}/deseq2-results")).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["num_significant"], 1);
    assert_eq!(body["summary"]["Significant DEGs"], "1");
    assert_eq!(body["significant_degs"][0]["log2FoldChange"], 1.2346);

    let resp = server
        .client
        .get(format!(
            "{}/runs/{run_id}/deseq2-download/significant_degs",
            server.base
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(
        resp.headers()[reqwest::header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .contains("text/csv")
    );
}
