//! Scripted gateway for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{
    CheckoutForm, CheckoutFormRequest, GatewayError, PaymentGateway, PaymentResult, PaymentStatus,
};

/// What `retrieve_checkout` answers for a token.
#[derive(Debug, Clone)]
pub enum ScriptedRetrieve {
    /// Return this result. A `None` conversation id echoes the request's.
    Result {
        conversation_id: Option<String>,
        status: PaymentStatus,
    },
    /// Fail the call itself with this message.
    Error(String),
}

/// [`PaymentGateway`] that returns scripted answers and records calls.
#[derive(Default)]
pub struct MockGateway {
    retrievals: Mutex<HashMap<String, ScriptedRetrieve>>,
    initialize_error: Mutex<Option<String>>,
    initialized: Mutex<Vec<CheckoutFormRequest>>,
    issued: AtomicUsize,
    retrieve_calls: AtomicUsize,
}

impl MockGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `retrieve_checkout(token, _)` with `status`.
    pub fn script(&self, token: &str, status: PaymentStatus) {
        self.retrievals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                token.to_string(),
                ScriptedRetrieve::Result {
                    conversation_id: None,
                    status,
                },
            );
    }

    /// Answer `retrieve_checkout(token, _)` with an arbitrary scripted reply.
    pub fn script_raw(&self, token: &str, reply: ScriptedRetrieve) {
        self.retrievals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.to_string(), reply);
    }

    /// Make every `initialize_checkout` call fail.
    pub fn fail_initialize(&self, message: &str) {
        *self
            .initialize_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(message.to_string());
    }

    /// Checkout-form requests received so far.
    #[must_use]
    pub fn initialized(&self) -> Vec<CheckoutFormRequest> {
        self.initialized
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn retrieve_calls(&self) -> usize {
        self.retrieve_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn initialize_checkout(
        &self,
        request: &CheckoutFormRequest,
    ) -> Result<CheckoutForm, GatewayError> {
        if let Some(message) = self
            .initialize_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(GatewayError::Api {
                code: "mock".to_string(),
                message,
            });
        }

        self.initialized
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let token = format!("mock-token-{n}");

        Ok(CheckoutForm {
            payment_page_url: Some(format!("https://sandbox.example/pay/{token}")),
            token,
        })
    }

    async fn retrieve_checkout(
        &self,
        token: &str,
        conversation_id: &str,
    ) -> Result<PaymentResult, GatewayError> {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);

        let reply = self
            .retrievals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned();

        match reply {
            Some(ScriptedRetrieve::Result {
                conversation_id: echoed,
                status,
            }) => Ok(PaymentResult {
                conversation_id: Some(echoed.unwrap_or_else(|| conversation_id.to_string())),
                status,
            }),
            Some(ScriptedRetrieve::Error(message)) => Err(GatewayError::Api {
                code: "mock".to_string(),
                message,
            }),
            None => Err(GatewayError::Api {
                code: "5093".to_string(),
                message: "Token not found".to_string(),
            }),
        }
    }
}
