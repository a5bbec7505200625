//! Tower middleware that puts an [`AdmissionEngine`] in front of a service.
//!
//! For every request the layer derives a resource identifier, asks the engine
//! for admission and then either
//! - calls the inner service while holding the entry (released when the response
//!   future completes or is dropped), or
//! - short-circuits: with a fallback configured, the fallback's response is
//!   returned as a success; otherwise the call fails with
//!   [`AdmissionError::Blocked`], which an HTTP layer maps to 429.
//!
//! ```rust
//! use flowgate::{AdmissionEngine, AdmissionLayer, Rule};
//! use tower::{service_fn, Layer, ServiceExt};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let engine = AdmissionEngine::builder()
//!     .rules(vec![Rule::new("GET:/ping", 1.0)])
//!     .build()
//!     .unwrap();
//! let layer = AdmissionLayer::new(engine, |_req: &&'static str| "GET:/ping".to_string())
//!     .with_fallback(|_req: &&'static str, _blocked: &flowgate::Blocked| "busy");
//! let svc = layer.layer(service_fn(|_req: &'static str| async {
//!     Ok::<_, std::io::Error>("pong")
//! }));
//!
//! assert_eq!(svc.clone().oneshot("ping").await.unwrap(), "pong");
//! assert_eq!(svc.oneshot("ping").await.unwrap(), "busy");
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{self, BoxFuture, FutureExt};
use tower_layer::Layer;
use tower_service::Service;

use crate::engine::{Admission, AdmissionEngine};
use crate::error::{AdmissionError, Blocked};
use crate::resource::ResourceExtractor;

/// Produces a degraded response for a blocked request.
pub trait Fallback<Req, Resp>: Send + Sync {
    /// Response to return instead of failing, or `None` to fail fast.
    fn respond(&self, req: &Req, blocked: &Blocked) -> Option<Resp>;
}

/// No fallback: blocked requests fail with [`AdmissionError::Blocked`].
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFallback;

impl<Req, Resp> Fallback<Req, Resp> for NoFallback {
    fn respond(&self, _req: &Req, _blocked: &Blocked) -> Option<Resp> {
        None
    }
}

/// Fallback backed by a closure.
#[derive(Clone, Copy)]
pub struct FallbackFn<F>(F);

impl<F> fmt::Debug for FallbackFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FallbackFn")
    }
}

impl<Req, Resp, F> Fallback<Req, Resp> for FallbackFn<F>
where
    F: Fn(&Req, &Blocked) -> Resp + Send + Sync,
{
    fn respond(&self, req: &Req, blocked: &Blocked) -> Option<Resp> {
        Some((self.0)(req, blocked))
    }
}

/// A layer that enforces per-resource quotas using an [`AdmissionEngine`].
pub struct AdmissionLayer<X, F = NoFallback> {
    engine: AdmissionEngine,
    extractor: Arc<X>,
    fallback: Arc<F>,
}

impl<X> AdmissionLayer<X, NoFallback> {
    /// Create a fail-fast admission layer.
    pub fn new(engine: AdmissionEngine, extractor: X) -> Self {
        Self { engine, extractor: Arc::new(extractor), fallback: Arc::new(NoFallback) }
    }
}

impl<X, F> AdmissionLayer<X, F> {
    /// Answer blocked requests with `fallback(req, blocked)` instead of an error.
    pub fn with_fallback<G>(self, fallback: G) -> AdmissionLayer<X, FallbackFn<G>> {
        AdmissionLayer {
            engine: self.engine,
            extractor: self.extractor,
            fallback: Arc::new(FallbackFn(fallback)),
        }
    }

    /// Engine shared by services built from this layer.
    pub fn engine(&self) -> &AdmissionEngine {
        &self.engine
    }
}

impl<X, F> Clone for AdmissionLayer<X, F> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            extractor: self.extractor.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

impl<X, F> fmt::Debug for AdmissionLayer<X, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionLayer").field("engine", &self.engine).finish()
    }
}

impl<S, X, F> Layer<S> for AdmissionLayer<X, F> {
    type Service = AdmissionService<S, X, F>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService {
            inner: service,
            engine: self.engine.clone(),
            extractor: self.extractor.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

/// Middleware service that enforces per-resource quotas.
pub struct AdmissionService<S, X, F = NoFallback> {
    inner: S,
    engine: AdmissionEngine,
    extractor: Arc<X>,
    fallback: Arc<F>,
}

impl<S: Clone, X, F> Clone for AdmissionService<S, X, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            engine: self.engine.clone(),
            extractor: self.extractor.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

impl<S: fmt::Debug, X, F> fmt::Debug for AdmissionService<S, X, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionService")
            .field("inner", &self.inner)
            .field("engine", &self.engine)
            .finish()
    }
}

impl<S, X, F, Req> Service<Req> for AdmissionService<S, X, F>
where
    S: Service<Req>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    X: ResourceExtractor<Req>,
    F: Fallback<Req, S::Response>,
{
    type Response = S::Response;
    type Error = AdmissionError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let resource = self.extractor.extract(&req);
        match self.engine.enter(&resource) {
            Admission::Admitted(entry) => {
                let response = self.inner.call(req);
                async move {
                    // Held for the lifetime of the call; released on drop.
                    let _entry = entry;
                    response.await.map_err(AdmissionError::Inner)
                }
                .boxed()
            }
            Admission::Blocked(blocked) => match self.fallback.respond(&req, &blocked) {
                Some(response) => future::ready(Ok(response)).boxed(),
                None => future::ready(Err(AdmissionError::Blocked(blocked))).boxed(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Rule;
    use tower::{service_fn, ServiceExt};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    fn engine(threshold: f64) -> AdmissionEngine {
        AdmissionEngine::builder().rules(vec![Rule::new("GET:/r", threshold)]).build().unwrap()
    }

    fn key(_req: &u32) -> String {
        "GET:/r".to_string()
    }

    #[tokio::test]
    async fn fails_fast_without_fallback() {
        let svc = AdmissionLayer::new(engine(1.0), key)
            .layer(service_fn(|req: u32| async move { Ok::<_, TestError>(req * 2) }));

        assert_eq!(svc.clone().oneshot(2).await.unwrap(), 4);
        let err = svc.oneshot(3).await.unwrap_err();
        assert!(err.is_blocked());
        assert_eq!(err.blocked().unwrap().resource(), "GET:/r");
    }

    #[tokio::test]
    async fn fallback_sees_request_and_block() {
        let svc = AdmissionLayer::new(engine(1.0), key)
            .with_fallback(|req: &u32, blocked: &Blocked| {
                assert_eq!(blocked.rule().threshold, 1.0);
                1000 + *req
            })
            .layer(service_fn(|req: u32| async move { Ok::<_, TestError>(req) }));

        assert_eq!(svc.clone().oneshot(1).await.unwrap(), 1);
        assert_eq!(svc.oneshot(7).await.unwrap(), 1007);
    }

    #[tokio::test]
    async fn inner_errors_still_release_the_entry() {
        let engine = engine(10.0);
        let svc = AdmissionLayer::new(engine.clone(), key).layer(service_fn(|_req: u32| async {
            Err::<u32, _>(TestError("boom".into()))
        }));

        let err = svc.oneshot(1).await.unwrap_err();
        assert_eq!(err.into_inner(), Some(TestError("boom".into())));
        let snap = engine.stats("GET:/r").unwrap();
        assert_eq!((snap.in_flight, snap.completed), (0, 1));
    }

    #[tokio::test]
    async fn entry_is_held_while_inner_runs() {
        let engine = engine(10.0);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let rx = std::sync::Mutex::new(Some(rx));
        let svc = AdmissionLayer::new(engine.clone(), key).layer(service_fn(move |_req: u32| {
            let rx = rx.lock().unwrap().take();
            async move {
                if let Some(rx) = rx {
                    let _ = rx.await;
                }
                Ok::<_, TestError>(())
            }
        }));

        let handle = tokio::spawn(svc.oneshot(1));
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(engine.stats("GET:/r").unwrap().in_flight, 1);

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(engine.stats("GET:/r").unwrap().in_flight, 0);
    }

    #[tokio::test]
    async fn dropped_response_future_releases_the_entry() {
        let engine = engine(10.0);
        let mut svc = AdmissionLayer::new(engine.clone(), key).layer(service_fn(|_req: u32| {
            futures::future::pending::<Result<(), TestError>>()
        }));

        let fut = svc.ready().await.unwrap().call(1);
        assert_eq!(engine.stats("GET:/r").unwrap().in_flight, 1);
        drop(fut);
        assert_eq!(engine.stats("GET:/r").unwrap().in_flight, 0);
    }
}
