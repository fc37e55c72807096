//! The host page's HTTP boundary and the response interceptor that translates bodies.
//!
//! `HostHttp` offers the two request primitives page code uses: a promise-style
//! [`HostHttp::fetch`] and an XHR-style [`XmlHttpRequest`]. Interceptors are
//! registered once on the boundary and see every completed response of both before
//! page code does.

use std::borrow::Cow;
use std::rc::Rc;

use anyhow::{anyhow, Context};
use encoding_rs::{Encoding, UTF_8};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::dictionary::CompiledDictionary;
use crate::session::SessionState;
use crate::substitute::Mode;

pub const DEFAULT_CONTENT_TYPES: [&str; 2] = ["text/html", "application/json"];

static CHARSET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)charset\s*=\s*"?([^";\s]+)"#).expect("charset regex"));

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: default_status_text(status).to_string(),
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body: body.into(),
        }
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or("")
    }

    /// Body decoded with the declared charset (UTF-8 when absent), lossy.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        let (text, _, _) = body_encoding(self.content_type()).decode(&self.body);
        text
    }
}

fn default_status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}

fn body_encoding(content_type: &str) -> &'static Encoding {
    CHARSET_RE
        .captures(content_type)
        .and_then(|c| c.get(1))
        .and_then(|m| Encoding::for_label(m.as_str().as_bytes()))
        .unwrap_or(UTF_8)
}

/// What actually talks to the network.
pub trait Transport {
    fn send(&self, request: &HttpRequest) -> anyhow::Result<HttpResponse>;
}

impl<F> Transport for F
where
    F: Fn(&HttpRequest) -> anyhow::Result<HttpResponse>,
{
    fn send(&self, request: &HttpRequest) -> anyhow::Result<HttpResponse> {
        self(request)
    }
}

/// Sees a completed response before page code; must return a response in every case.
pub trait ResponseInterceptor {
    fn intercept(&self, request: &HttpRequest, response: HttpResponse) -> HttpResponse;
}

pub struct HostHttp<T> {
    transport: T,
    interceptors: Vec<Rc<dyn ResponseInterceptor>>,
}

impl<T: Transport> HostHttp<T> {
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            interceptors: Vec::new(),
        }
    }

    /// Adds `interceptor` unless this same instance is already registered.
    pub fn register_interceptor(&mut self, interceptor: Rc<dyn ResponseInterceptor>) -> bool {
        if self.interceptors.iter().any(|i| Rc::ptr_eq(i, &interceptor)) {
            return false;
        }
        self.interceptors.push(interceptor);
        true
    }

    #[must_use]
    pub fn interceptor_count(&self) -> usize {
        self.interceptors.len()
    }

    /// Transport errors propagate unchanged; interceptors only see completed responses.
    pub fn fetch(&self, request: HttpRequest) -> anyhow::Result<HttpResponse> {
        let response = self.transport.send(&request)?;
        Ok(self.run_interceptors(&request, response))
    }

    #[must_use]
    pub fn xhr(&self) -> XmlHttpRequest<'_, T> {
        XmlHttpRequest {
            host: self,
            request: None,
            ready_state: ReadyState::Unsent,
            response: None,
            error: None,
            listeners: Vec::new(),
        }
    }

    fn run_interceptors(&self, request: &HttpRequest, mut response: HttpResponse) -> HttpResponse {
        for i in &self.interceptors {
            response = i.intercept(request, response);
        }
        response
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    Unsent = 0,
    Opened = 1,
    HeadersReceived = 2,
    Loading = 3,
    Done = 4,
}

type ReadyStateListener<'h, T> = Box<dyn FnMut(&XmlHttpRequest<'h, T>) + 'h>;

/// XHR-style request object. Listeners run once the request is done, after interception.
pub struct XmlHttpRequest<'h, T> {
    host: &'h HostHttp<T>,
    request: Option<HttpRequest>,
    ready_state: ReadyState,
    response: Option<HttpResponse>,
    error: Option<anyhow::Error>,
    listeners: Vec<ReadyStateListener<'h, T>>,
}

impl<'h, T: Transport> XmlHttpRequest<'h, T> {
    pub fn open(&mut self, method: &str, url: &str) {
        self.request = Some(HttpRequest {
            method: method.to_string(),
            url: url.to_string(),
            ..HttpRequest::default()
        });
        self.response = None;
        self.error = None;
        self.ready_state = ReadyState::Opened;
    }

    pub fn set_request_header(&mut self, name: &str, value: &str) -> anyhow::Result<()> {
        let req = self.request.as_mut().context("set_request_header before open")?;
        req.headers.push((name.to_string(), value.to_string()));
        Ok(())
    }

    pub fn add_ready_state_listener(&mut self, listener: impl FnMut(&XmlHttpRequest<'h, T>) + 'h) {
        self.listeners.push(Box::new(listener));
    }

    /// Performs the request. Network failures end in `Done` with status 0, like a browser;
    /// only calling `send` out of order is an error.
    pub fn send(&mut self, body: Option<Vec<u8>>) -> anyhow::Result<()> {
        if self.ready_state != ReadyState::Opened {
            return Err(anyhow!("send called in state {:?}", self.ready_state));
        }
        let mut request = self.request.take().context("send without open")?;
        request.body = body;
        match self.host.transport.send(&request) {
            Ok(response) => {
                self.response = Some(self.host.run_interceptors(&request, response));
            }
            Err(err) => {
                log::debug!("xhr {} {} failed: {err:#}", request.method, request.url);
                self.error = Some(err);
            }
        }
        self.request = Some(request);
        self.ready_state = ReadyState::Done;

        let mut listeners = std::mem::take(&mut self.listeners);
        for l in listeners.iter_mut() {
            l(&*self);
        }
        listeners.append(&mut self.listeners);
        self.listeners = listeners;
        Ok(())
    }

    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.response.as_ref().map_or(0, |r| r.status)
    }

    #[must_use]
    pub fn status_text(&self) -> &str {
        self.response.as_ref().map_or("", |r| r.status_text.as_str())
    }

    #[must_use]
    pub fn response_text(&self) -> Option<Cow<'_, str>> {
        self.response.as_ref().map(HttpResponse::text)
    }

    #[must_use]
    pub fn response(&self) -> Option<&HttpResponse> {
        self.response.as_ref()
    }

    #[must_use]
    pub fn get_response_header(&self, name: &str) -> Option<&str> {
        self.response.as_ref().and_then(|r| r.header(name))
    }

    #[must_use]
    pub fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_ref()
    }
}

/// Rewrites eligible HTML/JSON bodies through the session's dictionary.
///
/// Mode and the enable flag are read when the response completes, not when the request
/// was made.
pub struct TranslatingInterceptor {
    state: Rc<SessionState>,
    content_types: Vec<String>,
}

impl TranslatingInterceptor {
    #[must_use]
    pub fn new(state: Rc<SessionState>, content_types: Vec<String>) -> Self {
        let content_types = content_types.into_iter().map(|c| c.to_ascii_lowercase()).collect();
        Self {
            state,
            content_types,
        }
    }

    #[must_use]
    pub fn with_default_types(state: Rc<SessionState>) -> Self {
        Self::new(state, DEFAULT_CONTENT_TYPES.iter().map(|s| s.to_string()).collect())
    }

    fn eligible(&self, response: &HttpResponse) -> bool {
        if !self.state.intercept_enabled() || !self.state.mode().translates() {
            return false;
        }
        if response.status != 200 {
            return false;
        }
        let ct = response.content_type().to_ascii_lowercase();
        self.content_types.iter().any(|t| ct.contains(t.as_str()))
    }
}

impl ResponseInterceptor for TranslatingInterceptor {
    fn intercept(&self, request: &HttpRequest, response: HttpResponse) -> HttpResponse {
        if !self.eligible(&response) {
            return response;
        }
        let mode = self.state.mode();
        let dict = self.state.dictionary();
        match translate_body(&response, &dict, mode) {
            Ok(Some(body)) => HttpResponse { body, ..response },
            Ok(None) => response,
            Err(err) => {
                log::warn!("leaving response of {} untranslated: {err:#}", request.url);
                response
            }
        }
    }
}

/// `Ok(None)` when the text did not change.
fn translate_body(
    response: &HttpResponse,
    dict: &CompiledDictionary,
    mode: Mode,
) -> anyhow::Result<Option<Vec<u8>>> {
    let encoding = body_encoding(response.content_type());
    let text = encoding
        .decode_without_bom_handling_and_without_replacement(&response.body)
        .ok_or_else(|| anyhow!("body is not valid {}", encoding.name()))?;
    let rewritten = match dict.substitute(&text, mode) {
        Cow::Borrowed(_) => return Ok(None),
        Cow::Owned(s) => s,
    };
    let (bytes, used, unmappable) = encoding.encode(&rewritten);
    if unmappable || used != encoding {
        return Err(anyhow!("translated body cannot be encoded as {}", encoding.name()));
    }
    Ok(Some(bytes.into_owned()))
}
