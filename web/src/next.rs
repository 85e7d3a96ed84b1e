//! The continuation passed to every handler.

use crate::app::Layer;
use crate::error::AppError;
use crate::request::Request;
use crate::response::Response;
use std::sync::Arc;

struct Chain {
    layers: Vec<Arc<Layer>>,
    request: Request,
    response: Response,
}

/// Passes control to the next matching layer.
///
/// A handler that neither responds nor calls [`Next::run`] leaves the request
/// unanswered until its response handle is dropped.
#[derive(Clone)]
pub struct Next {
    chain: Arc<Chain>,
    position: usize,
}

impl Next {
    pub(crate) fn start(layers: Vec<Arc<Layer>>, request: Request, response: Response) -> Self {
        Self {
            chain: Arc::new(Chain {
                layers,
                request,
                response,
            }),
            position: 0,
        }
    }

    /// Invoke the next layer whose verb and path match the request.
    ///
    /// When the stack is exhausted the request is answered with a 404.
    pub fn run(&self) {
        let Chain {
            layers,
            request,
            response,
        } = self.chain.as_ref();

        for (idx, layer) in layers.iter().enumerate().skip(self.position) {
            let Some(params) = layer.matches(request.method(), request.path()) else {
                continue;
            };

            tracing::trace!(layer = %layer.describe(), "Invoking layer");
            request.set_params(params);
            let next = Self {
                chain: Arc::clone(&self.chain),
                position: idx + 1,
            };
            (layer.handler())(request.clone(), response.clone(), next);
            return;
        }

        tracing::debug!(
            method = %request.method(),
            path = %request.path(),
            "No layer handled the request"
        );
        response.send_error(AppError::no_route(request.method(), request.path()));
    }

    /// The request this continuation belongs to.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.chain.request
    }

    /// The response this continuation belongs to.
    #[must_use]
    pub fn response(&self) -> &Response {
        &self.chain.response
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("position", &self.position)
            .field("layers", &self.chain.layers.len())
            .finish()
    }
}
