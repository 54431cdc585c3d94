#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

pub mod temp_files {
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;
    use url::Url;

    /// A scratch directory holding the documents of one contract.
    pub struct ContractDir {
        dir: TempDir,
    }

    impl ContractDir {
        pub fn new() -> Self {
            Self {
                dir: tempfile::Builder::new().prefix("brrtc_test_").tempdir().unwrap(),
            }
        }

        pub fn path(&self) -> &Path {
            self.dir.path()
        }

        /// Writes `content` at `relative`, creating parent directories.
        pub fn write(&self, relative: &str, content: &str) -> PathBuf {
            let path = self.dir.path().join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&path, content).unwrap();
            path
        }

        pub fn url(&self, relative: &str) -> Url {
            Url::from_file_path(self.dir.path().join(relative)).unwrap()
        }

        /// Packs the listed files into `archive` (a tar under the scratch dir).
        pub fn tar(&self, archive: &str, members: &[(&str, &str)]) -> PathBuf {
            let path = self.dir.path().join(archive);
            let file = std::fs::File::create(&path).unwrap();
            let mut builder = tar::Builder::new(file);
            for (name, content) in members {
                let mut header = tar::Header::new_gnu();
                header.set_size(content.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, name, content.as_bytes()).unwrap();
            }
            builder.finish().unwrap();
            path
        }
    }
}

pub mod fetch {
    use brrtcontract::error::{ContractError, Result};
    use brrtcontract::resolver::Fetch;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use url::Url;

    /// In-memory documents; counts every fetch per URI.
    pub struct CountingFetcher {
        documents: HashMap<String, String>,
        calls: Mutex<HashMap<String, usize>>,
        delay: Duration,
        delays: HashMap<String, Duration>,
    }

    impl CountingFetcher {
        pub fn new(documents: &[(&str, &str)]) -> Self {
            Self {
                documents: documents
                    .iter()
                    .map(|(uri, body)| (uri.to_string(), body.to_string()))
                    .collect(),
                calls: Mutex::new(HashMap::new()),
                delay: Duration::from_millis(0),
                delays: HashMap::new(),
            }
        }

        /// Keeps fetches in flight long enough for siblings to overlap.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Overrides the delay for one URI.
        pub fn with_delay_for(mut self, uri: &str, delay: Duration) -> Self {
            self.delays.insert(uri.to_string(), delay);
            self
        }

        pub fn calls(&self, uri: &str) -> usize {
            self.calls.lock().unwrap().get(uri).copied().unwrap_or(0)
        }

        pub fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().values().sum()
        }
    }

    impl Fetch for CountingFetcher {
        fn fetch<'a>(&'a self, uri: &'a Url) -> BoxFuture<'a, Result<Vec<u8>>> {
            async move {
                let key = uri.as_str().to_string();
                *self.calls.lock().unwrap().entry(key.clone()).or_default() += 1;
                let delay = self.delays.get(&key).copied().unwrap_or(self.delay);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                self.documents
                    .get(&key)
                    .map(|body| body.clone().into_bytes())
                    .ok_or_else(|| ContractError::fetch(uri, "no such document"))
            }
            .boxed()
        }
    }
}

pub mod remote {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::thread::JoinHandle;
    use tiny_http::{Header, Response, Server};

    /// What the server saw for one request.
    #[derive(Debug, Clone)]
    pub struct SeenRequest {
        pub url: String,
        pub headers: HashMap<String, String>,
    }

    /// `tiny_http` server on an ephemeral port serving fixed documents.
    /// Unknown paths answer 404.
    pub struct DocumentServer {
        pub base: String,
        seen: Arc<Mutex<Vec<SeenRequest>>>,
        server: Arc<Server>,
        handle: Option<JoinHandle<()>>,
    }

    impl DocumentServer {
        pub fn start(documents: &[(&str, u16, &str)]) -> Self {
            let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
            let port = server.server_addr().to_ip().unwrap().port();
            let documents: HashMap<String, (u16, String)> = documents
                .iter()
                .map(|(path, status, body)| (path.to_string(), (*status, body.to_string())))
                .collect();
            let seen = Arc::new(Mutex::new(Vec::new()));

            let handle = {
                let server = Arc::clone(&server);
                let seen = Arc::clone(&seen);
                std::thread::spawn(move || {
                    for request in server.incoming_requests() {
                        let url = request.url().to_string();
                        let headers = request
                            .headers()
                            .iter()
                            .map(|h| (h.field.as_str().as_str().to_ascii_lowercase(), h.value.as_str().to_string()))
                            .collect();
                        seen.lock().unwrap().push(SeenRequest {
                            url: url.clone(),
                            headers,
                        });
                        let path = url.split('?').next().unwrap_or_default();
                        let (status, body) = documents
                            .get(path)
                            .cloned()
                            .unwrap_or((404, "not found".to_string()));
                        let response = Response::from_string(body)
                            .with_status_code(status)
                            .with_header(Header::from_bytes("Content-Type", "application/yaml").unwrap());
                        let _ = request.respond(response);
                    }
                })
            };

            Self {
                base: format!("http://127.0.0.1:{port}"),
                seen,
                server,
                handle: Some(handle),
            }
        }

        pub fn url(&self, path: &str) -> String {
            format!("{}{path}", self.base)
        }

        pub fn seen(&self) -> Vec<SeenRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Drop for DocumentServer {
        fn drop(&mut self) {
            self.server.unblock();
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

pub mod contracts {
    use brrtcontract::spec::{build_contract, Contract, ContractLoader, LoadedContract};
    use brrtcontract::LoaderOptions;

    use super::temp_files::ContractDir;

    /// Wraps a `paths:` block (indented by two spaces) into a minimal contract.
    pub fn with_paths(paths: &str) -> String {
        format!("openapi: 3.0.3\ninfo:\n  title: test\n  version: \"1\"\npaths:\n{paths}")
    }

    pub async fn load(dir: &ContractDir, root: &str) -> brrtcontract::Result<LoadedContract> {
        ContractLoader::new(LoaderOptions::default())?
            .load(dir.path().join(root).to_str().unwrap())
            .await
    }

    /// Writes `yaml` as `openapi.yaml`, loads and compiles it.
    pub async fn compile(yaml: &str) -> brrtcontract::Result<Contract> {
        let dir = ContractDir::new();
        dir.write("openapi.yaml", yaml);
        let loaded = load(&dir, "openapi.yaml").await?;
        build_contract(&loaded)
    }
}
