//! iyzico checkout-form client.
//!
//! Requests are authenticated with the `IYZWSv2` scheme:
//!
//! ```text
//! x-iyzi-rnd:    {random key}
//! signature:     hex(HMAC-SHA256(secret key, random key + uri path + json body))
//! Authorization: IYZWSv2 base64("apiKey:{api key}&randomKey:{random key}&signature:{signature}")
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, instrument};

use async_trait::async_trait;
use kumas_core::{Currency, round_money};

use super::{
    CheckoutForm, CheckoutFormRequest, GatewayError, PaymentGateway, PaymentResult, PaymentStatus,
};
use crate::config::PaymentConfig;
use crate::models::PaymentDetails;

const INITIALIZE_PATH: &str = "/payment/iyzipos/checkoutform/initialize/auth/ecom";
const RETRIEVE_PATH: &str = "/payment/iyzipos/checkoutform/auth/ecom/detail";

type HmacSha256 = Hmac<Sha256>;

/// iyzico API client.
#[derive(Clone)]
pub struct IyzicoClient {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    secret_key: SecretString,
}

impl IyzicoClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &PaymentConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn auth_headers(&self, path: &str, body: &str) -> Result<HeaderMap, GatewayError> {
        let random_key = format!(
            "{}{}",
            chrono::Utc::now().timestamp_millis(),
            rand::random::<u32>()
        );
        let authorization = authorization_header(
            self.api_key.expose_secret(),
            self.secret_key.expose_secret(),
            &random_key,
            path,
            body,
        )?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&authorization)
                .map_err(|e| GatewayError::Signing(format!("invalid header: {e}")))?,
        );
        headers.insert(
            "x-iyzi-rnd",
            HeaderValue::from_str(&random_key)
                .map_err(|e| GatewayError::Signing(format!("invalid header: {e}")))?,
        );
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn post<Req, Resp>(&self, path: &str, request: &Req) -> Result<Resp, GatewayError>
    where
        Req: Serialize + Sync,
        Resp: for<'de> Deserialize<'de> + ApiStatus,
    {
        let body =
            serde_json::to_string(request).map_err(|e| GatewayError::Parse(e.to_string()))?;
        let headers = self.auth_headers(path, &body)?;

        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        debug!(%status, path, "gateway responded");

        let parsed: Resp = serde_json::from_str(&text).map_err(|e| {
            GatewayError::Parse(format!("HTTP {status}: {e}"))
        })?;
        parsed.check()?;
        Ok(parsed)
    }
}

/// Build the `IYZWSv2` authorization header value.
fn authorization_header(
    api_key: &str,
    secret_key: &str,
    random_key: &str,
    path: &str,
    body: &str,
) -> Result<String, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|e| GatewayError::Signing(e.to_string()))?;
    mac.update(random_key.as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    let params = format!("apiKey:{api_key}&randomKey:{random_key}&signature:{signature}");
    Ok(format!("IYZWSv2 {}", STANDARD.encode(params)))
}

fn money(amount: Decimal) -> String {
    round_money(amount).to_string()
}

const fn locale(currency: Currency) -> &'static str {
    match currency {
        Currency::Try => "tr",
        Currency::Eur => "en",
    }
}

/// Common `status` / `errorMessage` envelope.
trait ApiStatus {
    fn check(&self) -> Result<(), GatewayError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    status: String,
    error_code: Option<String>,
    error_message: Option<String>,
}

impl Envelope {
    fn check(&self) -> Result<(), GatewayError> {
        if self.status.eq_ignore_ascii_case("success") {
            return Ok(());
        }
        Err(GatewayError::Api {
            code: self.error_code.clone().unwrap_or_default(),
            message: self
                .error_message
                .clone()
                .unwrap_or_else(|| "Payment provider returned an error".to_string()),
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeRequest<'a> {
    locale: &'static str,
    conversation_id: &'a str,
    price: String,
    paid_price: String,
    currency: &'static str,
    basket_id: &'a str,
    payment_group: &'static str,
    callback_url: &'a str,
    enabled_installments: [u8; 4],
    buyer: BuyerJson<'a>,
    shipping_address: AddressJson<'a>,
    billing_address: AddressJson<'a>,
    basket_items: Vec<BasketItemJson<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BuyerJson<'a> {
    id: &'a str,
    name: &'a str,
    surname: &'a str,
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    gsm_number: Option<&'a str>,
    identity_number: &'a str,
    registration_address: &'a str,
    city: &'a str,
    country: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    zip_code: Option<&'a str>,
    ip: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddressJson<'a> {
    contact_name: String,
    city: &'a str,
    country: &'a str,
    address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    zip_code: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BasketItemJson<'a> {
    id: &'a str,
    name: &'a str,
    category1: &'a str,
    item_type: &'static str,
    price: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResponse {
    #[serde(flatten)]
    envelope: Envelope,
    token: Option<String>,
    payment_page_url: Option<String>,
}

impl ApiStatus for InitializeResponse {
    fn check(&self) -> Result<(), GatewayError> {
        self.envelope.check()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveRequest<'a> {
    locale: &'static str,
    conversation_id: &'a str,
    token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveResponse {
    #[serde(flatten)]
    envelope: Envelope,
    conversation_id: Option<String>,
    payment_status: Option<String>,
    payment_id: Option<String>,
    paid_price: Option<Decimal>,
    installment: Option<i32>,
    card_association: Option<String>,
    card_family: Option<String>,
    bin_number: Option<String>,
    last_four_digits: Option<String>,
    fraud_status: Option<i32>,
}

impl ApiStatus for RetrieveResponse {
    fn check(&self) -> Result<(), GatewayError> {
        self.envelope.check()
    }
}

impl RetrieveResponse {
    fn into_result(self) -> PaymentResult {
        let succeeded = self
            .payment_status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("SUCCESS"));

        let status = if succeeded {
            PaymentStatus::Success(PaymentDetails {
                payment_id: self.payment_id,
                paid_price: self.paid_price,
                installment: self.installment,
                card_association: self.card_association,
                card_family: self.card_family,
                bin_number: self.bin_number,
                last_four_digits: self.last_four_digits,
                fraud_status: self.fraud_status,
            })
        } else {
            PaymentStatus::Failure(
                self.envelope
                    .error_message
                    .unwrap_or_else(|| "Payment was not completed".to_string()),
            )
        };

        PaymentResult {
            conversation_id: self.conversation_id,
            status,
        }
    }
}

#[async_trait]
impl PaymentGateway for IyzicoClient {
    #[instrument(skip(self, request), fields(conversation_id = %request.conversation_id))]
    async fn initialize_checkout(
        &self,
        request: &CheckoutFormRequest,
    ) -> Result<CheckoutForm, GatewayError> {
        let buyer = &request.buyer;
        let contact_name = format!("{} {}", buyer.name, buyer.surname);
        let address = || AddressJson {
            contact_name: contact_name.clone(),
            city: &buyer.city,
            country: &buyer.country,
            address: &buyer.address,
            zip_code: buyer.zip_code.as_deref(),
        };

        let body = InitializeRequest {
            locale: locale(request.currency),
            conversation_id: &request.conversation_id,
            price: money(request.price),
            paid_price: money(request.paid_price),
            currency: request.currency.code(),
            basket_id: &request.basket_id,
            payment_group: "PRODUCT",
            callback_url: &request.callback_url,
            enabled_installments: [1, 2, 3, 6],
            buyer: BuyerJson {
                id: &buyer.id,
                name: &buyer.name,
                surname: &buyer.surname,
                email: &buyer.email,
                gsm_number: buyer.phone.as_deref(),
                identity_number: &buyer.identity_number,
                registration_address: &buyer.address,
                city: &buyer.city,
                country: &buyer.country,
                zip_code: buyer.zip_code.as_deref(),
                ip: &buyer.ip,
            },
            shipping_address: address(),
            billing_address: address(),
            basket_items: request
                .items
                .iter()
                .map(|item| BasketItemJson {
                    id: &item.id,
                    name: &item.name,
                    category1: &item.category,
                    item_type: "PHYSICAL",
                    price: money(item.price),
                })
                .collect(),
        };

        let response: InitializeResponse = self.post(INITIALIZE_PATH, &body).await?;
        let token = response
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::Parse("checkout form response without token".to_string()))?;

        Ok(CheckoutForm {
            token,
            payment_page_url: response.payment_page_url,
        })
    }

    #[instrument(skip(self, token))]
    async fn retrieve_checkout(
        &self,
        token: &str,
        conversation_id: &str,
    ) -> Result<PaymentResult, GatewayError> {
        let body = RetrieveRequest {
            locale: "tr",
            conversation_id,
            token,
        };

        let response: RetrieveResponse = self.post(RETRIEVE_PATH, &body).await?;
        Ok(response.into_result())
    }
}
