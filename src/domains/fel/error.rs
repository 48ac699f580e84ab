use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum FelError {
    /// Error de red, timeout o respuesta HTTP no exitosa
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        /// Cuerpo de una respuesta HTTP no exitosa
        raw_response: Option<String>,
    },

    /// El certificador respondió pero sin identificador (o con error propio)
    #[error("Provider error: {message}")]
    Provider {
        message: String,
        raw_response: Option<String>,
    },
}

impl FelError {
    pub fn transport(message: impl Into<String>) -> Self {
        FelError::Transport {
            message: message.into(),
            raw_response: None,
        }
    }

    /// Respuesta HTTP no exitosa; el cuerpo queda para auditoría
    pub fn http_status(message: impl Into<String>, body: String) -> Self {
        FelError::Transport {
            message: message.into(),
            raw_response: Some(body).filter(|b| !b.trim().is_empty()),
        }
    }

    pub fn provider(message: impl Into<String>, raw_response: Option<String>) -> Self {
        FelError::Provider {
            message: message.into(),
            raw_response,
        }
    }

    pub fn raw_response(&self) -> Option<&str> {
        match self {
            FelError::Provider { raw_response, .. } | FelError::Transport { raw_response, .. } => {
                raw_response.as_deref()
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FelError::Transport { .. } => "transport",
            FelError::Provider { .. } => "provider",
        }
    }

    /// Payload que se guarda en `invoices.response_json` al fallar
    pub fn to_audit_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "raw_response": self.raw_response(),
        })
    }
}

impl From<reqwest::Error> for FelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FelError::transport(format!("timeout calling provider: {}", err))
        } else {
            FelError::transport(format!("HTTP error calling provider: {}", err))
        }
    }
}
