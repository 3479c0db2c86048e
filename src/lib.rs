use std::env;
use std::fmt;
use std::io::Write;
use std::time::Duration;

#[cfg(all(feature = "reqwest", feature = "ureq"))]
compile_error!("Features 'reqwest' and 'ureq' are mutually exclusive.");

#[cfg(not(any(feature = "reqwest", feature = "ureq")))]
compile_error!("One of the features 'reqwest' and 'ureq' must be enabled.");

use serde::Serialize;

#[cfg(feature = "ureq")]
use ureq;

#[cfg(feature = "reqwest")]
use reqwest;

pub const CHAT_API_KEY: &str = "CHAT_API_KEY";
pub const CHAT_API_URL: &str = "CHAT_API_URL";
pub const CHAT_MODEL: &str = "CHAT_MODEL";
pub const CHAT_TIMEOUT_SECS: &str = "CHAT_TIMEOUT_SECS";

pub const DEFAULT_API_URL: &str = "https://api.302ai.cn/v1/chat/completions";
pub const DEFAULT_CHAT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_PROMPT: &str = "Hello, how are you today?";

/// Sent when no key is configured. The server is expected to reject it.
pub const PLACEHOLDER_API_KEY: &str = "YOUR_API_KEY";

pub const ROLE_USER: &str = "user";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("The configuration contains errors: {0}")]
    BadConfigurationError(String),

    #[error("Failed to serialize request: {0}")]
    SerializationError(serde_json::Error),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("{}", .0.status_line())]
    ApiError(Response),

    #[error("Failed to deserialize response: {source}")]
    DeserializationError {
        source: serde_json::Error,
        response: Response,
    },

    #[error("Failed to write output: {0}")]
    OutputError(std::io::Error),
}

impl Error {
    /// The response the server sent, if the failure happened after one arrived.
    ///
    /// `NetworkError` never has one: the fault happened before any response
    /// was received.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Error::ApiError(response) => Some(response),
            Error::DeserializationError { response, .. } => Some(response),
            _ => None,
        }
    }
}

/// A response as received, whatever its status.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub url: String,
    pub text: String,
}

impl Response {
    /// True for 4xx and 5xx.
    pub fn is_error(&self) -> bool {
        (400..600).contains(&self.status)
    }

    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.text)
    }

    fn status_line(&self) -> String {
        let class = if self.status < 500 { "Client" } else { "Server" };
        format!(
            "{} {} Error: {} for url: {}",
            self.status, class, self.reason, self.url
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Chat completion request body.
///
/// Only `model` and `messages` are sent:
///
/// ```rust
/// let request = chat_probe::ChatRequest::user_prompt("some-model", "Hi");
/// let body = serde_json::to_string(&request).unwrap();
/// assert_eq!(
///     body,
///     r#"{"model":"some-model","messages":[{"role":"user","content":"Hi"}]}"#
/// );
/// ```
#[derive(Debug, serde::Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
}

impl ChatRequest {
    pub fn user_prompt(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message {
                role: ROLE_USER.into(),
                content: content.into(),
            }],
        }
    }
}

/// Headers sent with every request, in wire order.
pub fn request_headers(api_key: &str) -> [(&'static str, String); 3] {
    [
        ("Content-Type", "application/json".into()),
        ("Accept", "application/json".into()),
        ("Authorization", format!("Bearer {}", api_key)),
    ]
}

#[derive(Clone)]
pub struct Config {
    pub api_url: String,
    pub model: String,
    pub api_key: String,
    pub prompt: String,
    /// `None` blocks until the transport itself gives up.
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            model: DEFAULT_CHAT_MODEL.into(),
            api_key: PLACEHOLDER_API_KEY.into(),
            prompt: DEFAULT_PROMPT.into(),
            timeout: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("prompt", &self.prompt)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Config {
    /// Reads `CHAT_API_URL`, `CHAT_API_KEY`, `CHAT_MODEL` and
    /// `CHAT_TIMEOUT_SECS`, falling back to the built-in defaults.
    ///
    /// Empty variables are treated as unset.
    pub fn from_environment() -> Result<Config, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_environment`, but variables are resolved through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Config::default();

        let timeout = match var(CHAT_TIMEOUT_SECS) {
            Some(secs) => {
                let secs = secs.trim().parse::<u64>().map_err(|e| {
                    Error::BadConfigurationError(format!("{}: {}", CHAT_TIMEOUT_SECS, e))
                })?;
                if secs == 0 {
                    return Err(Error::BadConfigurationError(format!(
                        "{}: must be greater than zero",
                        CHAT_TIMEOUT_SECS
                    )));
                }
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Config {
            api_url: var(CHAT_API_URL).unwrap_or(defaults.api_url),
            model: var(CHAT_MODEL).unwrap_or(defaults.model),
            api_key: var(CHAT_API_KEY).unwrap_or(defaults.api_key),
            prompt: defaults.prompt,
            timeout,
        })
    }

    pub fn uses_placeholder_key(&self) -> bool {
        self.api_key == PLACEHOLDER_API_KEY
    }
}

/// Sends a request body to an endpoint.
///
/// Implementations return `Ok` for every response that arrives, including 4xx
/// and 5xx. Only faults that prevent a response from being obtained at all are
/// reported as `Error::NetworkError`.
pub trait Transport {
    fn post(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        body: String,
    ) -> Result<Response, Error>;
}

#[cfg(feature = "ureq")]
pub struct HttpTransport {
    client: ureq::Agent,
}

#[cfg(feature = "ureq")]
impl HttpTransport {
    pub fn new(timeout: Option<Duration>) -> Result<HttpTransport, Error> {
        let mut builder = ureq::AgentBuilder::new();

        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build(),
        })
    }
}

#[cfg(feature = "ureq")]
impl Transport for HttpTransport {
    fn post(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        body: String,
    ) -> Result<Response, Error> {
        let mut request = self.client.post(url);

        for (name, value) in headers {
            request = request.set(name, value);
        }

        // ureq reports 4xx/5xx as errors but still hands over the response.
        let response = match request.send_string(&body) {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(e) => return Err(Error::NetworkError(e.to_string())),
        };

        let status = response.status();
        let reason = response.status_text().to_string();
        let url = response.get_url().to_string();

        // `into_string` caps bodies at 10 MB; read them whole instead.
        let mut bytes = Vec::new();
        std::io::Read::read_to_end(&mut response.into_reader(), &mut bytes)
            .map_err(|e| Error::NetworkError(e.to_string()))?;

        Ok(Response {
            status,
            reason,
            url,
            text: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

#[cfg(feature = "reqwest")]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "reqwest")]
impl HttpTransport {
    pub fn new(timeout: Option<Duration>) -> Result<HttpTransport, Error> {
        // The blocking client defaults to a 30s timeout; pass ours explicitly.
        let client = reqwest::blocking::ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::BadConfigurationError(e.to_string()))?;

        Ok(Self { client })
    }
}

#[cfg(feature = "reqwest")]
impl Transport for HttpTransport {
    fn post(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        body: String,
    ) -> Result<Response, Error> {
        let mut request = self.client.post(url);

        for (name, value) in headers {
            let mut value = reqwest::header::HeaderValue::from_str(value)
                .map_err(|e| Error::BadConfigurationError(e.to_string()))?;
            if name.eq_ignore_ascii_case("Authorization") {
                value.set_sensitive(true);
            }
            request = request.header(*name, value);
        }

        let response = request
            .body(body)
            .send()
            .map_err(|e| Error::NetworkError(e.to_string()))?;

        let status = response.status();
        let url = response.url().to_string();
        let text = response
            .text()
            .map_err(|e| Error::NetworkError(e.to_string()))?;

        Ok(Response {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            url,
            text,
        })
    }
}

/// A successful exchange: the status and the body parsed as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub status: u16,
    pub body: serde_json::Value,
}

/// Runs one chat completion request and reports the outcome.
pub struct Runner<T: Transport = HttpTransport> {
    config: Config,
    transport: T,
}

impl Runner<HttpTransport> {
    /// Creates a runner that talks HTTP(S) using the configured timeout.
    pub fn new(config: Config) -> Result<Runner<HttpTransport>, Error> {
        let transport = HttpTransport::new(config.timeout)?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport> Runner<T> {
    pub fn with_transport(config: Config, transport: T) -> Runner<T> {
        Self { config, transport }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn request(&self) -> ChatRequest {
        ChatRequest::user_prompt(self.config.model.as_str(), self.config.prompt.as_str())
    }

    /// Sends the request and classifies the result.
    ///
    /// # Returns
    ///
    /// A `Completion` for a non-error status with a JSON body. Otherwise one of
    /// `NetworkError` (nothing received), `ApiError` (4xx/5xx) or
    /// `DeserializationError` (body is not JSON). The latter two keep the
    /// response so its raw text can still be shown.
    pub fn execute(&self) -> Result<Completion, Error> {
        let body = serde_json::to_string(&self.request()).map_err(Error::SerializationError)?;
        let headers = request_headers(&self.config.api_key);

        tracing::debug!(
            url = %self.config.api_url,
            model = %self.config.model,
            "sending chat completion request"
        );
        let response = self.transport.post(&self.config.api_url, &headers, body)?;
        tracing::debug!(status = response.status, "received response");

        if response.is_error() {
            return Err(Error::ApiError(response));
        }

        match response.json() {
            Ok(body) => Ok(Completion {
                status: response.status,
                body,
            }),
            Err(source) => Err(Error::DeserializationError { source, response }),
        }
    }

    /// Executes the request and prints the outcome to `out`.
    ///
    /// Request failures are printed, not returned. Only a failure to write to
    /// `out` is an error.
    pub fn run<W: Write>(&self, out: &mut W) -> Result<(), Error> {
        let outcome = self.execute();

        if let Err(e) = &outcome {
            tracing::warn!(error = %e, "chat completion request failed");
        }

        report(&outcome, out).map_err(Error::OutputError)
    }
}

/// Serializes `value` as JSON indented by four spaces.
pub fn pretty_json(value: &serde_json::Value) -> Result<Vec<u8>, serde_json::Error> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value.serialize(&mut serializer)?;
    Ok(buffer)
}

/// Prints an outcome.
///
/// On success this is the status code followed by the indented body. On
/// failure it is the error, followed by the raw body if a response was
/// received.
pub fn report<W: Write>(outcome: &Result<Completion, Error>, out: &mut W) -> std::io::Result<()> {
    match outcome {
        Ok(completion) => {
            writeln!(out, "Response Status Code: {}", completion.status)?;
            writeln!(out, "Response JSON:")?;
            out.write_all(&pretty_json(&completion.body)?)?;
            writeln!(out)
        }
        Err(error) => {
            writeln!(out, "Request failed: {}", error)?;
            if let Some(response) = error.response() {
                writeln!(out, "Response content: {}", response.text)?;
            }
            Ok(())
        }
    }
}
