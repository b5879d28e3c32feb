use crate::api::endpoints;
use crate::error::ClientError;
use crate::refresh::AuthRefreshGate;
use crate::types::{PdfSlipRequest, QuoteOffer, QuoteRequest};
use tracing::{debug, warn};

const PDF_MAGIC: &[u8] = b"%PDF";

/// Premium quotes and printable slips. Shares the session's refresh gate.
#[derive(Clone)]
pub struct QuoteService {
    gate: AuthRefreshGate,
}

impl QuoteService {
    pub fn new(gate: AuthRefreshGate) -> Self {
        Self { gate }
    }

    pub async fn calculate(&self, request: &QuoteRequest) -> Result<Vec<QuoteOffer>, ClientError> {
        let offers: Vec<QuoteOffer> = self
            .gate
            .execute_json(&endpoints::calculate_quotes(request)?)
            .await?;
        debug!(offers = offers.len(), "quotes calculated");
        Ok(offers)
    }

    /// Renders a slip on the backend and returns the PDF bytes.
    pub async fn export_slip(&self, request: &PdfSlipRequest) -> Result<Vec<u8>, ClientError> {
        let response = self.gate.execute_ok(&endpoints::pdf_slip(request)?).await?;
        if !response.body.starts_with(PDF_MAGIC) {
            warn!(bytes = response.body.len(), "slip response is not a PDF");
            return Err(ClientError::Api {
                status: response.status,
                message: "response is not a PDF document".to_string(),
            });
        }
        Ok(response.body)
    }
}
