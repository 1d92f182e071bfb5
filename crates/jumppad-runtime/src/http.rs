use crate::ClientError;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

const DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Single-attempt probes; callers own retry and back-off.
pub trait HttpClient: Send + Sync {
    /// Issue a request and return the status code. Connection failures are
    /// [`ClientError::Unavailable`].
    fn status(&self, method: &str, url: &str) -> Result<u16, ClientError>;

    /// Open and close a TCP connection to `host:port`.
    fn dial(&self, address: &str) -> Result<(), ClientError>;
}

pub struct UreqHttp {
    agent: ureq::Agent,
}

impl Default for UreqHttp {
    fn default() -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
        }
    }
}

impl UreqHttp {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Map a ureq failure for `url` onto the client taxonomy.
pub(crate) fn classify(service: &str, url: &str, e: ureq::Error) -> ClientError {
    match e {
        ureq::Error::StatusCode(404) => ClientError::NotFound(url.to_owned()),
        ureq::Error::StatusCode(code) => ClientError::CommandFailed(format!("HTTP {code} for {url}")),
        ureq::Error::Timeout(_) => ClientError::Timeout(url.to_owned()),
        other => ClientError::unavailable(service, other.to_string()),
    }
}

/// Read a response body to a string.
pub(crate) fn read_body(resp: ureq::http::Response<ureq::Body>) -> Result<String, ClientError> {
    let mut reader = resp.into_body().into_reader();
    let mut body = String::new();
    reader.read_to_string(&mut body)?;
    Ok(body)
}

impl HttpClient for UreqHttp {
    fn status(&self, method: &str, url: &str) -> Result<u16, ClientError> {
        let result = match method.to_ascii_uppercase().as_str() {
            "HEAD" => self.agent.head(url).call(),
            "POST" => self.agent.post(url).send_empty(),
            "DELETE" => self.agent.delete(url).call(),
            _ => self.agent.get(url).call(),
        };
        match result {
            Ok(resp) => Ok(resp.status().as_u16()),
            Err(ureq::Error::StatusCode(code)) => Ok(code),
            Err(e) => Err(classify("http", url, e)),
        }
    }

    fn dial(&self, address: &str) -> Result<(), ClientError> {
        let addrs = address
            .to_socket_addrs()
            .map_err(|e| ClientError::InvalidArgument(format!("{address}: {e}")))?;
        let mut last = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, DIAL_TIMEOUT) {
                Ok(_) => return Ok(()),
                Err(e) => last = Some(e),
            }
        }
        Err(ClientError::unavailable(
            "tcp",
            last.map_or_else(|| format!("{address} did not resolve"), |e| format!("{address}: {e}")),
        ))
    }
}
