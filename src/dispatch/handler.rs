//! Middleware shapes.
//!
//! Every middleware is stored as one uniform shape,
//! `call(Request, Response, Next) -> future of Result<(), BoxError>`.
//! Closures of any arity are lifted into it through [`IntoMiddleware`]:
//!
//! ```text
//! async || …                          → ignores everything, auto-advanced
//! async |req| …                       → reads the request, auto-advanced
//! async |req, res| …                  → may finish the response, auto-advanced
//! async |req, res, next| …            → may call `next.run().await` itself
//! sync(|req, res| …)                  → synchronous body, auto-advanced
//! ```
//!
//! Futures may resolve to `()` or to `Result<(), E>` for any `E: Into<BoxError>`.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use crate::dispatch::Next;
use crate::error::BoxError;
use crate::http::{Request, Response};

/// Boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a middleware settles to.
pub type HandlerResult = Result<(), BoxError>;

/// A unit of request processing in a dispatch chain.
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, req: Request, res: Response, next: Next) -> BoxFuture<'static, HandlerResult>;
}

/// Shared, type-erased middleware.
pub type BoxMiddleware = Arc<dyn Middleware>;

impl Middleware for BoxMiddleware {
    fn call(&self, req: Request, res: Response, next: Next) -> BoxFuture<'static, HandlerResult> {
        (**self).call(req, res, next)
    }
}

/// Return values a middleware body may produce.
pub trait IntoHandlerResult {
    fn into_handler_result(self) -> HandlerResult;
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> HandlerResult {
        Ok(())
    }
}

impl<E> IntoHandlerResult for Result<(), E>
where
    E: Into<BoxError>,
{
    fn into_handler_result(self) -> HandlerResult {
        self.map_err(Into::into)
    }
}

/// Conversion into a [`BoxMiddleware`]. `Marker` only disambiguates impls.
pub trait IntoMiddleware<Marker> {
    fn into_middleware(self) -> BoxMiddleware;
}

/// Marker for values that already implement [`Middleware`].
pub struct IsMiddleware;

impl<T: Middleware> IntoMiddleware<IsMiddleware> for T {
    fn into_middleware(self) -> BoxMiddleware {
        Arc::new(self)
    }
}

/// Closure adapter; `Args` records which parameters the closure takes.
pub struct FnMiddleware<F, Args> {
    f: F,
    _args: PhantomData<fn() -> Args>,
}

impl<F, Args> FnMiddleware<F, Args> {
    fn boxed(f: F) -> BoxMiddleware
    where
        Self: Middleware,
    {
        Arc::new(Self {
            f,
            _args: PhantomData,
        })
    }
}

fn settle<Fut>(fut: Fut) -> BoxFuture<'static, HandlerResult>
where
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    Box::pin(async move { fut.await.into_handler_result() })
}

impl<F, Fut> Middleware for FnMiddleware<F, ()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    fn call(&self, _req: Request, _res: Response, _next: Next) -> BoxFuture<'static, HandlerResult> {
        settle((self.f)())
    }
}

impl<F, Fut> Middleware for FnMiddleware<F, (Request,)>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    fn call(&self, req: Request, _res: Response, _next: Next) -> BoxFuture<'static, HandlerResult> {
        settle((self.f)(req))
    }
}

impl<F, Fut> Middleware for FnMiddleware<F, (Request, Response)>
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    fn call(&self, req: Request, res: Response, _next: Next) -> BoxFuture<'static, HandlerResult> {
        settle((self.f)(req, res))
    }
}

impl<F, Fut> Middleware for FnMiddleware<F, (Request, Response, Next)>
where
    F: Fn(Request, Response, Next) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    fn call(&self, req: Request, res: Response, next: Next) -> BoxFuture<'static, HandlerResult> {
        settle((self.f)(req, res, next))
    }
}

impl<F, Fut> IntoMiddleware<()> for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    fn into_middleware(self) -> BoxMiddleware {
        FnMiddleware::<F, ()>::boxed(self)
    }
}

impl<F, Fut> IntoMiddleware<(Request,)> for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    fn into_middleware(self) -> BoxMiddleware {
        FnMiddleware::<F, (Request,)>::boxed(self)
    }
}

impl<F, Fut> IntoMiddleware<(Request, Response)> for F
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    fn into_middleware(self) -> BoxMiddleware {
        FnMiddleware::<F, (Request, Response)>::boxed(self)
    }
}

impl<F, Fut> IntoMiddleware<(Request, Response, Next)> for F
where
    F: Fn(Request, Response, Next) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    fn into_middleware(self) -> BoxMiddleware {
        FnMiddleware::<F, (Request, Response, Next)>::boxed(self)
    }
}

/// Synchronous middleware; see [`sync`].
pub struct SyncFn<F>(F);

/// Lift a synchronous `Fn(&Request, &Response) -> R` into a middleware.
///
/// The chain advances automatically once it returns, unless it finished
/// the response.
pub fn sync<F, R>(f: F) -> SyncFn<F>
where
    F: Fn(&Request, &Response) -> R + Send + Sync + 'static,
    R: IntoHandlerResult,
{
    SyncFn(f)
}

impl<F, R> Middleware for SyncFn<F>
where
    F: Fn(&Request, &Response) -> R + Send + Sync + 'static,
    R: IntoHandlerResult,
{
    fn call(&self, req: Request, res: Response, _next: Next) -> BoxFuture<'static, HandlerResult> {
        let result = (self.0)(&req, &res).into_handler_result();
        Box::pin(std::future::ready(result))
    }
}
