//! Frame handlers

use crate::{Connection, HandlerError};
use async_trait::async_trait;
use rsocket_proto::{FrameView, TypedFrame};
use std::future::Future;
use std::marker::PhantomData;

/// Callback invoked for each decoded frame of type `F`.
///
/// Handlers run on the connection's read loop, one frame at a time in
/// arrival order. A handler that waits on something slow stalls every
/// stream on the connection; long work belongs on a spawned task.
#[async_trait]
pub trait Handler<F>: Send + Sync + 'static
where
    F: Send + 'static,
{
    /// Handle one frame
    async fn handle(&self, connection: &Connection, frame: F) -> Result<(), HandlerError>;
}

/// Handler built from an async closure, see [`handler_fn`]
#[derive(Clone)]
pub struct FnHandler<C> {
    f: C,
}

/// Wrap `f(connection, frame)` as a [`Handler`]
pub fn handler_fn<C>(f: C) -> FnHandler<C> {
    FnHandler { f }
}

#[async_trait]
impl<C, F, Fut> Handler<F> for FnHandler<C>
where
    C: Fn(Connection, F) -> Fut + Send + Sync + 'static,
    F: Send + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, connection: &Connection, frame: F) -> Result<(), HandlerError> {
        (self.f)(connection.clone(), frame).await
    }
}

/// Type-erased handler stored in the registry
#[async_trait]
pub(crate) trait DynHandler: Send + Sync {
    async fn call(&self, connection: &Connection, frame: TypedFrame) -> Result<(), HandlerError>;
}

pub(crate) struct Typed<H, F> {
    handler: H,
    _frame: PhantomData<fn(F)>,
}

impl<H, F> Typed<H, F> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _frame: PhantomData,
        }
    }
}

#[async_trait]
impl<H, F> DynHandler for Typed<H, F>
where
    H: Handler<F>,
    F: FrameView + Send + 'static,
{
    async fn call(&self, connection: &Connection, frame: TypedFrame) -> Result<(), HandlerError> {
        match F::from_typed(frame) {
            Some(frame) => self.handler.handle(connection, frame).await,
            // Registry keys pin the frame type, so this is unreachable in practice
            None => Ok(()),
        }
    }
}
