//! Message bodies flowing through the proxy
//!
//! Bodies stream through untouched unless an interceptor asks to read one,
//! in which case it is buffered once and put back so the original bytes are
//! still forwarded if the interceptor decides not to rewrite it.

use crate::error::Result;
use crate::json::JsonObject;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use hyper::header::HeaderValue;
use hyper::{HeaderMap, Request, Response};

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

pub fn full_body(content: impl Into<Bytes>) -> ProxyBody {
    Full::new(content.into())
        .map_err(|never| match never {})
        .boxed()
}

/// A request or response whose body an interceptor may rewrite
pub trait HttpMessage: Send {
    fn headers_mut(&mut self) -> &mut HeaderMap;
    fn body_mut(&mut self) -> &mut ProxyBody;
}

impl HttpMessage for Request<ProxyBody> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        Request::headers_mut(self)
    }

    fn body_mut(&mut self) -> &mut ProxyBody {
        Request::body_mut(self)
    }
}

impl HttpMessage for Response<ProxyBody> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        Response::headers_mut(self)
    }

    fn body_mut(&mut self) -> &mut ProxyBody {
        Response::body_mut(self)
    }
}

/// Buffer the body and decode it as a JSON object.
///
/// Returns `None` for an empty body. The buffered bytes replace the body so
/// the message can still be forwarded as it was.
pub async fn read_json<M: HttpMessage>(message: &mut M) -> Result<Option<JsonObject>> {
    let body = std::mem::replace(message.body_mut(), empty_body());
    let bytes = body.collect().await?.to_bytes();
    *message.body_mut() = full_body(bytes.clone());

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Replace the body with the serialized object, fixing up framing headers.
pub fn write_json<M: HttpMessage>(message: &mut M, object: &JsonObject) -> Result<()> {
    let bytes = serde_json::to_vec(object)?;
    let headers = message.headers_mut();
    headers.remove(TRANSFER_ENCODING);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    *message.body_mut() = full_body(bytes);
    Ok(())
}
