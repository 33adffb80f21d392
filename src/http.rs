//! Outbound HTTP for extensions and image checks.
//!
//! One [`HttpSession`] is built at startup and shared by reference: a blocking
//! reqwest client, an explicit cookie jar, default headers and the session
//! user agent. Responses that look like a Cloudflare challenge are optionally
//! handed to a FlareSolverr instance and retried once with the solved cookies.

use anyhow::{Context, Result, anyhow};
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, SERVER, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

const CHALLENGE_STATUSES: [u16; 2] = [403, 503];
const CHALLENGE_SERVERS: [&str; 2] = ["cloudflare-nginx", "cloudflare"];
const SOLVER_SESSION: &str = "extension-tester";

#[derive(Clone, Debug)]
pub struct HttpOptions {
    pub user_agent: String,
    /// Default headers, applied before the user agent.
    pub headers: Vec<(String, String)>,
    /// Whole-request deadline; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub flaresolverr: Option<FlareSolverrOptions>,
}

#[derive(Clone, Debug)]
pub struct FlareSolverrOptions {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Answers whether a URL is reachable.
pub trait ResourceProbe {
    /// HTTP status of a GET for `url`.
    fn status(&self, url: &str) -> Result<u16>;
}

pub struct HttpSession {
    client: Client,
    jar: Arc<Jar>,
    user_agent: RwLock<String>,
    solver: Option<ChallengeSolver>,
}

impl HttpSession {
    pub fn new(options: &HttpOptions) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .default_headers(header_map(&options.headers)?)
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .build()
            .context("building HTTP client")?;
        let solver = options
            .flaresolverr
            .as_ref()
            .map(ChallengeSolver::new)
            .transpose()?;
        Ok(Self {
            client,
            jar,
            user_agent: RwLock::new(options.user_agent.clone()),
            solver,
        })
    }

    pub fn user_agent(&self) -> String {
        match self.user_agent.read() {
            Ok(agent) => agent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_user_agent(&self, agent: &str) {
        match self.user_agent.write() {
            Ok(mut current) => *current = agent.to_string(),
            Err(poisoned) => *poisoned.into_inner() = agent.to_string(),
        }
    }

    pub fn get(&self, url: &str) -> Result<HttpResponse> {
        self.execute(url, |client, url| client.get(url))
    }

    pub fn post(&self, url: &str, body: &str, content_type: &str) -> Result<HttpResponse> {
        let body = body.to_string();
        let content_type = content_type.to_string();
        self.execute(url, move |client, url| {
            client
                .post(url)
                .header(CONTENT_TYPE, content_type.as_str())
                .body(body.clone())
        })
    }

    fn execute(
        &self,
        url: &str,
        build: impl Fn(&Client, Url) -> RequestBuilder,
    ) -> Result<HttpResponse> {
        let parsed = Url::parse(url).with_context(|| format!("invalid URL `{url}`"))?;
        debug!(%url, "request");
        let response = build(&self.client, parsed.clone())
            .header(USER_AGENT, self.user_agent())
            .send()
            .with_context(|| format!("requesting {url}"))?;

        let status = response.status().as_u16();
        let server = response
            .headers()
            .get(SERVER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        if !is_challenge(status, server.as_deref()) {
            return read(url, response);
        }
        let Some(solver) = &self.solver else {
            return read(url, response);
        };

        debug!(%url, "Cloudflare challenge detected, asking FlareSolverr");
        let solution = match solver.solve(&parsed, &self.jar) {
            Ok(solution) => solution,
            Err(err) => {
                warn!(%url, "challenge resolution failed: {err:#}");
                return read(url, response);
            }
        };
        if !(200..300).contains(&solution.status) {
            debug!(%url, status = solution.status, "Cloudflare challenge failed to resolve");
            return read(url, response);
        }
        for cookie in &solution.cookies {
            self.jar.add_cookie_str(&cookie.to_set_cookie(), &parsed);
        }
        self.set_user_agent(&solution.user_agent);

        let retried = build(&self.client, parsed)
            .header(USER_AGENT, self.user_agent())
            .send()
            .with_context(|| format!("retrying {url} after challenge"))?;
        read(url, retried)
    }
}

impl ResourceProbe for HttpSession {
    fn status(&self, url: &str) -> Result<u16> {
        Ok(self.get(url)?.status)
    }
}

fn read(url: &str, response: reqwest::blocking::Response) -> Result<HttpResponse> {
    let status = response.status().as_u16();
    let body = response
        .bytes()
        .with_context(|| format!("reading body of {url}"))?
        .to_vec();
    Ok(HttpResponse { status, body })
}

/// A 403/503 served by Cloudflare's edge.
pub fn is_challenge(status: u16, server: Option<&str>) -> bool {
    CHALLENGE_STATUSES.contains(&status)
        && server.is_some_and(|server| CHALLENGE_SERVERS.contains(&server))
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name `{name}`"))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header `{name}`"))?;
        map.insert(name, value);
    }
    Ok(map)
}

struct ChallengeSolver {
    endpoint: String,
    timeout: Duration,
    client: Client,
    lock: Mutex<()>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SolverRequest<'a> {
    cmd: &'a str,
    url: &'a str,
    session: &'a str,
    #[serde(rename = "session_ttl_minutes")]
    session_ttl_minutes: u32,
    cookies: Vec<SolverCookie>,
    return_only_cookies: bool,
    max_timeout: u64,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
struct SolverCookie {
    name: String,
    value: String,
}

#[derive(Deserialize, Debug)]
struct SolverResponse {
    solution: Solution,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Solution {
    status: u16,
    #[serde(default)]
    cookies: Vec<SolutionCookie>,
    user_agent: String,
}

#[derive(Deserialize, Debug)]
struct SolutionCookie {
    name: String,
    value: String,
    #[serde(default)]
    domain: String,
    #[serde(default)]
    path: Option<String>,
}

impl SolutionCookie {
    fn to_set_cookie(&self) -> String {
        let mut cookie = format!("{}={}", self.name, self.value);
        let domain = self.domain.trim_start_matches('.');
        if !domain.is_empty() {
            cookie.push_str(&format!("; Domain={domain}"));
        }
        match self.path.as_deref() {
            Some(path) if !path.is_empty() => cookie.push_str(&format!("; Path={path}")),
            _ => cookie.push_str("; Path=/"),
        }
        cookie
    }
}

impl ChallengeSolver {
    fn new(options: &FlareSolverrOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.timeout + Duration::from_secs(10))
            .build()
            .context("building FlareSolverr client")?;
        Ok(Self {
            endpoint: solver_endpoint(&options.url),
            timeout: options.timeout,
            client,
            lock: Mutex::new(()),
        })
    }

    /// One resolution at a time; concurrent callers wait for the holder.
    fn solve(&self, url: &Url, jar: &Jar) -> Result<Solution> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("FlareSolverr lock poisoned"))?;
        let request = SolverRequest {
            cmd: "request.get",
            url: url.as_str(),
            session: SOLVER_SESSION,
            session_ttl_minutes: 15,
            cookies: jar_cookies(jar, url),
            return_only_cookies: true,
            max_timeout: timeout_millis(self.timeout),
        };
        let response: SolverResponse = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .with_context(|| format!("calling FlareSolverr at {}", self.endpoint))?
            .json()
            .context("decoding FlareSolverr response")?;
        Ok(response.solution)
    }
}

fn solver_endpoint(base: &str) -> String {
    format!("{}/v1", base.trim_end_matches('/'))
}

fn jar_cookies(jar: &Jar, url: &Url) -> Vec<SolverCookie> {
    let Some(header) = jar.cookies(url) else {
        return Vec::new();
    };
    let Ok(text) = header.to_str() else {
        return Vec::new();
    };
    text.split("; ")
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| SolverCookie {
            name: name.to_string(),
            value: value.to_string(),
        })
        .collect()
}

/// Milliseconds for the solver's `maxTimeout`, saturating at `u64::MAX`.
fn timeout_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}
