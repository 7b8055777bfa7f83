use bridge_domain::{Error as DomainError, RetryConfig};

use crate::error::Error;

const TRANSPORT_ERROR_CODES: [&str; 3] = ["ERR_STREAM_PREMATURE_CLOSE", "ECONNRESET", "ETIMEDOUT"];

/// Marks `error` as retryable when it carries a status listed in
/// `retry_config` or comes from a broken transport.
pub fn into_retry(error: anyhow::Error, retry_config: &RetryConfig) -> anyhow::Error {
    if let Some(code) = get_http_status_code(&error)
        .or(get_req_status_code(&error))
        .or(get_event_req_status_code(&error))
        .or(get_api_status_code(&error))
        && retry_config.retry_status_codes.contains(&code)
    {
        return DomainError::Retryable(error).into();
    }

    if is_req_transport_error(&error)
        || is_event_transport_error(&error)
        || is_api_transport_error(&error)
    {
        return DomainError::Retryable(error).into();
    }

    error
}

fn get_http_status_code(error: &anyhow::Error) -> Option<u16> {
    error.downcast_ref::<DomainError>().and_then(DomainError::status)
}

fn get_req_status_code(error: &anyhow::Error) -> Option<u16> {
    error
        .downcast_ref::<reqwest::Error>()
        .and_then(|error| error.status())
        .map(|status| status.as_u16())
}

fn get_event_req_status_code(error: &anyhow::Error) -> Option<u16> {
    error
        .downcast_ref::<reqwest_eventsource::Error>()
        .and_then(|error| match error {
            reqwest_eventsource::Error::InvalidStatusCode(status, _) => Some(status.as_u16()),
            reqwest_eventsource::Error::InvalidContentType(_, response) => {
                Some(response.status().as_u16())
            }
            _ => None,
        })
}

fn get_api_status_code(error: &anyhow::Error) -> Option<u16> {
    error.downcast_ref::<Error>().and_then(Error::status)
}

fn is_req_transport_error(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<reqwest::Error>()
        .is_some_and(|e| e.is_timeout() || e.is_connect())
}

fn is_event_transport_error(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<reqwest_eventsource::Error>()
        .is_some_and(|e| matches!(e, reqwest_eventsource::Error::Transport(_)))
}

fn is_api_transport_error(error: &anyhow::Error) -> bool {
    error.downcast_ref::<Error>().is_some_and(|error| match error {
        Error::Api { code, .. } => TRANSPORT_ERROR_CODES.contains(&code.as_str()),
        _ => false,
    })
}
