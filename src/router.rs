//! Request routing.
//!
//! Patterns are checked in table order and the first match wins. A prefix
//! pattern hands the rest of the target to its endpoint as the parameter.
//! Longer or more specific patterns must come before shorter ones.

use crate::protocol::{Request, Response, Status};
use crate::storage::{FileStore, StoreError};
use tracing::{trace, warn};

/// How a route matches a request target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Target must equal the literal
    Exact(&'static str),
    /// Target must start with the literal; the remainder is the parameter
    Prefix(&'static str),
}

impl Pattern {
    /// Returns the parameter on a match (empty for exact matches)
    fn matches<'a>(&self, target: &'a str) -> Option<&'a str> {
        match self {
            Pattern::Exact(path) => (target == *path).then_some(""),
            Pattern::Prefix(prefix) => target.strip_prefix(*prefix),
        }
    }
}

/// Behaviors reachable through the route table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Root,
    Echo,
    UserAgent,
    Files,
}

/// Ordered route table plus the state its endpoints need
pub struct Router {
    routes: Vec<(Pattern, Endpoint)>,
    store: FileStore,
}

impl Router {
    pub fn new(store: FileStore) -> Self {
        Router {
            routes: vec![
                (Pattern::Exact("/"), Endpoint::Root),
                (Pattern::Prefix("/echo/"), Endpoint::Echo),
                (Pattern::Exact("/user-agent"), Endpoint::UserAgent),
                (Pattern::Prefix("/files/"), Endpoint::Files),
            ],
            store,
        }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Find the first route matching `target`
    pub fn lookup<'a>(&self, target: &'a str) -> Option<(Endpoint, &'a str)> {
        self.routes
            .iter()
            .find_map(|(pattern, endpoint)| pattern.matches(target).map(|param| (*endpoint, param)))
    }

    /// Produce the response for a request
    pub async fn route(&self, request: &Request) -> Response {
        let Some((endpoint, param)) = self.lookup(&request.target) else {
            trace!(uri = %request.target, "No route matched");
            return Response::empty(Status::NotFound);
        };

        match endpoint {
            Endpoint::Root => Response::empty(Status::Ok),
            Endpoint::Echo => Response::new(
                Status::Ok,
                param.to_string(),
                &[("Content-Type", "text/plain")],
            ),
            Endpoint::UserAgent => {
                let agent = request.headers.get("user-agent").unwrap_or_default();
                Response::new(Status::Ok, agent.to_string(), &[])
            }
            Endpoint::Files => self.files(request, param).await,
        }
    }

    async fn files(&self, request: &Request, name: &str) -> Response {
        if request.method == "GET" {
            match self.store.read(name).await {
                Ok(contents) => Response::new(
                    Status::Ok,
                    contents,
                    &[("Content-Type", "application/octet-stream")],
                ),
                Err(StoreError::NotFound(_)) => Response::empty(Status::NotFound),
                Err(e) => {
                    warn!(error = %e, "File read failed");
                    Response::empty(Status::NotFound)
                }
            }
        } else {
            match self.store.write(name, &request.body).await {
                Ok(()) => Response::empty(Status::Created),
                Err(e) => {
                    warn!(error = %e, "File write failed");
                    Response::empty(Status::InternalServerError)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_request;
    use tempfile::TempDir;

    fn router(dir: &TempDir) -> Router {
        Router::new(FileStore::new(dir.path()))
    }

    async fn send(router: &Router, raw: &[u8]) -> Response {
        let request = parse_request(raw).unwrap();
        router.route(&request).await
    }

    #[test]
    fn test_lookup_order() {
        let router = Router::new(FileStore::new("."));
        assert_eq!(router.lookup("/"), Some((Endpoint::Root, "")));
        assert_eq!(router.lookup("/echo/a/b"), Some((Endpoint::Echo, "a/b")));
        assert_eq!(router.lookup("/user-agent"), Some((Endpoint::UserAgent, "")));
        assert_eq!(router.lookup("/files/x.txt"), Some((Endpoint::Files, "x.txt")));
        assert_eq!(router.lookup("/user-agent/extra"), None);
        assert_eq!(router.lookup("/echo"), None);
        assert_eq!(router.lookup("/files"), None);
    }

    #[tokio::test]
    async fn test_root() {
        let dir = TempDir::new().unwrap();
        let response = send(&router(&dir), b"GET / HTTP/1.1\r\n\r\n").await;
        assert_eq!(response.status, Status::Ok);
        assert!(response.body.is_empty());
        assert_eq!(response.header("Content-Length"), Some("0"));
    }

    #[tokio::test]
    async fn test_echo() {
        let dir = TempDir::new().unwrap();
        let response = send(&router(&dir), b"GET /echo/foo HTTP/1.1\r\n\r\n").await;
        assert_eq!(response.status, Status::Ok);
        assert_eq!(&response.body[..], b"foo");
        assert_eq!(response.header("Content-Type"), Some("text/plain"));
        assert_eq!(response.header("Content-Length"), Some("3"));
    }

    #[tokio::test]
    async fn test_user_agent() {
        let dir = TempDir::new().unwrap();
        let router = router(&dir);

        let response = send(&router, b"GET /user-agent HTTP/1.1\r\nUser-Agent: curl/8\r\n\r\n").await;
        assert_eq!(response.status, Status::Ok);
        assert_eq!(&response.body[..], b"curl/8");

        let response = send(&router, b"GET /user-agent HTTP/1.1\r\n\r\n").await;
        assert_eq!(response.status, Status::Ok);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let dir = TempDir::new().unwrap();
        let response = send(&router(&dir), b"GET /unknown/path HTTP/1.1\r\n\r\n").await;
        assert_eq!(response.status, Status::NotFound);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let response = send(&router(&dir), b"GET /files/missing.txt HTTP/1.1\r\n\r\n").await;
        assert_eq!(response.status, Status::NotFound);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn test_write_then_read_file() {
        let dir = TempDir::new().unwrap();
        let router = router(&dir);

        let response = send(
            &router,
            b"POST /files/new.txt HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello",
        )
        .await;
        assert_eq!(response.status, Status::Created);

        let response = send(&router, b"GET /files/new.txt HTTP/1.1\r\n\r\n").await;
        assert_eq!(response.status, Status::Ok);
        assert_eq!(&response.body[..], b"hello");
        assert_eq!(
            response.header("Content-Type"),
            Some("application/octet-stream")
        );
        assert_eq!(response.header("Content-Length"), Some("5"));
    }

    #[tokio::test]
    async fn test_write_failure() {
        let dir = TempDir::new().unwrap();
        let router = Router::new(FileStore::new(dir.path().join("absent")));

        let response = send(
            &router,
            b"PUT /files/a.txt HTTP/1.1\r\nContent-Length: 1\r\n\r\nx",
        )
        .await;
        assert_eq!(response.status, Status::InternalServerError);
    }

    #[tokio::test]
    async fn test_traversal_is_confined() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"secret").unwrap();
        let router = Router::new(FileStore::new(&root));

        let response = send(&router, b"GET /files/../secret.txt HTTP/1.1\r\n\r\n").await;
        assert_eq!(response.status, Status::NotFound);

        let response = send(&router, b"GET /files/.. HTTP/1.1\r\n\r\n").await;
        assert_eq!(response.status, Status::NotFound);

        let response = send(
            &router,
            b"POST /files/../../planted.txt HTTP/1.1\r\nContent-Length: 1\r\n\r\nx",
        )
        .await;
        assert_eq!(response.status, Status::Created);
        assert!(root.join("planted.txt").exists());
        assert!(!dir.path().join("planted.txt").exists());
    }
}
