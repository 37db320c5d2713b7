//! 访问闸门：共享密钥换令牌、令牌校验与上传限流。

use axum::extract::{Extension, Json};
use axum::http::HeaderMap;
use axum::response::Json as JsonResponse;
use axum_extra::TypedHeader;
use axum_extra::extract::{CookieJar, cookie::Cookie};
use axum_extra::headers::{Authorization, authorization::Bearer};
use cookie::time::Duration as CookieDuration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::TOKEN_COOKIE_NAME;
use crate::error::ApiError;
use crate::http::{RequestScheme, is_https_request};

/// 进程级闸门状态：令牌集合与按地址的限流窗口。
/// 未配置密钥时闸门全开，所有请求直接放行。
#[derive(Debug)]
pub struct Gate {
    secret: Option<String>,
    pub token_ttl: Duration,
    tokens: Mutex<HashMap<String, TokenEntry>>,
    rate_window: Duration,
    rate_max_attempts: u32,
    rate_windows: Mutex<HashMap<IpAddr, RateWindow>>,
}

#[derive(Debug)]
struct TokenEntry {
    expires_at: Option<Instant>,
}

#[derive(Debug)]
struct RateWindow {
    window_start: Instant,
    attempts: u32,
}

impl Gate {
    pub fn new(
        secret: Option<String>,
        token_ttl: Duration,
        rate_window: Duration,
        rate_max_attempts: u32,
    ) -> Self {
        Self {
            secret,
            token_ttl,
            tokens: Mutex::new(HashMap::new()),
            rate_window,
            rate_max_attempts,
            rate_windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_guarded(&self) -> bool {
        self.secret.is_some()
    }

    /// 常数时间比较共享密钥，成功则签发新令牌。
    /// 失败只返回通用的未认证错误，不区分原因。
    pub async fn authenticate(&self, supplied: &str) -> Result<String, ApiError> {
        let Some(secret) = self.secret.as_deref() else {
            return Err(ApiError::BadRequest("authentication is not enabled".into()));
        };
        if !bool::from(secret.as_bytes().ct_eq(supplied.as_bytes())) {
            warn!("authentication failed");
            return Err(ApiError::Unauthenticated);
        }

        let token = Uuid::new_v4().to_string();
        let expires_at = (!self.token_ttl.is_zero()).then(|| Instant::now() + self.token_ttl);
        let mut tokens = self.tokens.lock().await;
        tokens.insert(token.clone(), TokenEntry { expires_at });
        Ok(token)
    }

    /// 校验请求携带的令牌；闸门全开时直接放行，过期令牌顺手移除。
    pub async fn authorize(&self, presented: Option<&str>) -> Result<(), ApiError> {
        if !self.is_guarded() {
            return Ok(());
        }
        let Some(token) = presented else {
            return Err(ApiError::Unauthenticated);
        };

        let mut tokens = self.tokens.lock().await;
        let now = Instant::now();
        match tokens.get(token) {
            Some(entry) if entry.expires_at.is_none_or(|at| at > now) => Ok(()),
            Some(_) => {
                tokens.remove(token);
                Err(ApiError::Unauthenticated)
            }
            None => Err(ApiError::Unauthenticated),
        }
    }

    /// 记录一次上传尝试并检查窗口配额。无论后续结果如何都计数。
    pub async fn note_attempt(&self, ip: IpAddr) -> Result<(), ApiError> {
        if self.rate_max_attempts == 0 {
            return Ok(());
        }

        let mut windows = self.rate_windows.lock().await;
        let now = Instant::now();
        let entry = windows.entry(ip).or_insert(RateWindow {
            window_start: now,
            attempts: 0,
        });

        if now.duration_since(entry.window_start) > self.rate_window {
            entry.window_start = now;
            entry.attempts = 0;
        }

        entry.attempts = entry.attempts.saturating_add(1);
        if entry.attempts > self.rate_max_attempts {
            let retry_after = self
                .rate_window
                .saturating_sub(now.duration_since(entry.window_start))
                .as_secs()
                .max(1);
            warn!(client_ip = %ip, attempts = entry.attempts, "upload rate limit exceeded");
            return Err(ApiError::TooManyRequests(retry_after));
        }
        Ok(())
    }
}

/// 按 Authorization 头、`token` 查询参数、会话 Cookie 的优先级提取令牌。
pub fn presented_token(
    bearer: Option<&TypedHeader<Authorization<Bearer>>>,
    query_token: Option<&str>,
    jar: &CookieJar,
) -> Option<String> {
    if let Some(TypedHeader(auth)) = bearer {
        return Some(auth.token().to_string());
    }
    if let Some(value) = query_token {
        return Some(value.to_string());
    }
    jar.get(TOKEN_COOKIE_NAME)
        .map(|cookie| cookie.value().to_string())
}

/// 提取令牌并交给闸门校验。
pub async fn authorize_request(
    gate: &Gate,
    bearer: Option<&TypedHeader<Authorization<Bearer>>>,
    query_token: Option<&str>,
    jar: &CookieJar,
) -> Result<(), ApiError> {
    let presented = presented_token(bearer, query_token, jar);
    gate.authorize(presented.as_deref()).await
}

#[derive(Deserialize)]
pub(crate) struct AuthRequest {
    password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthResponse {
    success: bool,
    token: String,
}

/// 登录接口：用共享密钥换取访问令牌，同时写入会话 Cookie。
pub async fn auth_exchange(
    Extension(gate): Extension<Arc<Gate>>,
    Extension(scheme): Extension<RequestScheme>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<AuthRequest>,
) -> Result<(CookieJar, JsonResponse<AuthResponse>), ApiError> {
    let token = gate.authenticate(&payload.password).await?;

    let secure = is_https_request(&headers, scheme);
    let mut cookie = Cookie::build((TOKEN_COOKIE_NAME, token.clone()))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(axum_extra::extract::cookie::SameSite::Strict);
    if !gate.token_ttl.is_zero() {
        cookie = cookie.max_age(CookieDuration::seconds(gate.token_ttl.as_secs() as i64));
    }
    let jar = jar.add(cookie.build());

    info!("access token issued");
    Ok((
        jar,
        JsonResponse(AuthResponse {
            success: true,
            token,
        }),
    ))
}

/// 清理过期令牌。
pub async fn prune_expired_tokens(gate: &Gate) {
    let mut tokens = gate.tokens.lock().await;
    let now = Instant::now();
    tokens.retain(|_, entry| entry.expires_at.is_none_or(|at| at > now));
}

/// 清理已过窗口的限流记录。
pub async fn prune_rate_windows(gate: &Gate) {
    let mut windows = gate.rate_windows.lock().await;
    let now = Instant::now();
    windows.retain(|_, entry| now.duration_since(entry.window_start) <= gate.rate_window);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));

    fn open_gate() -> Gate {
        Gate::new(None, Duration::ZERO, Duration::from_secs(900), 10)
    }

    fn guarded_gate() -> Gate {
        Gate::new(
            Some("letmein".to_string()),
            Duration::ZERO,
            Duration::from_secs(900),
            10,
        )
    }

    #[tokio::test]
    async fn open_gate_allows_anonymous_requests() {
        let gate = open_gate();
        assert!(!gate.is_guarded());
        gate.authorize(None).await.expect("open gate allows");
    }

    #[tokio::test]
    async fn open_gate_rejects_auth_exchange() {
        let gate = open_gate();
        let result = gate.authenticate("whatever").await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected_generically() {
        let gate = guarded_gate();
        let result = gate.authenticate("guess").await;
        assert!(matches!(result, Err(ApiError::Unauthenticated)));
    }

    #[tokio::test]
    async fn issued_token_authorizes_until_revoked_by_expiry() {
        let gate = guarded_gate();
        let token = gate.authenticate("letmein").await.expect("authenticate");
        gate.authorize(Some(&token)).await.expect("valid token");
        assert!(matches!(
            gate.authorize(Some("not-a-token")).await,
            Err(ApiError::Unauthenticated)
        ));
        assert!(matches!(
            gate.authorize(None).await,
            Err(ApiError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn multiple_tokens_coexist() {
        let gate = guarded_gate();
        let first = gate.authenticate("letmein").await.expect("first");
        let second = gate.authenticate("letmein").await.expect("second");
        assert_ne!(first, second);
        gate.authorize(Some(&first)).await.expect("first valid");
        gate.authorize(Some(&second)).await.expect("second valid");
    }

    #[tokio::test]
    async fn expired_token_is_rejected_and_pruned() {
        let gate = Gate::new(
            Some("letmein".to_string()),
            Duration::from_millis(20),
            Duration::from_secs(900),
            10,
        );
        let token = gate.authenticate("letmein").await.expect("authenticate");
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(
            gate.authorize(Some(&token)).await,
            Err(ApiError::Unauthenticated)
        ));
        prune_expired_tokens(&gate).await;
        assert!(gate.tokens.lock().await.is_empty());
    }

    #[tokio::test]
    async fn eleventh_attempt_in_window_is_rejected() {
        let gate = open_gate();
        for _ in 0..10 {
            gate.note_attempt(CLIENT).await.expect("within quota");
        }
        let result = gate.note_attempt(CLIENT).await;
        assert!(matches!(result, Err(ApiError::TooManyRequests(_))));
    }

    #[tokio::test]
    async fn window_resets_after_elapse() {
        let gate = Gate::new(None, Duration::ZERO, Duration::from_millis(30), 1);
        gate.note_attempt(CLIENT).await.expect("first attempt");
        assert!(matches!(
            gate.note_attempt(CLIENT).await,
            Err(ApiError::TooManyRequests(_))
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.note_attempt(CLIENT).await.expect("window reset");
    }

    #[tokio::test]
    async fn addresses_are_counted_independently() {
        let gate = Gate::new(None, Duration::ZERO, Duration::from_secs(900), 1);
        let other = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 21));
        gate.note_attempt(CLIENT).await.expect("first client");
        gate.note_attempt(other).await.expect("second client");
    }

    #[tokio::test]
    async fn zero_max_attempts_disables_rate_limit() {
        let gate = Gate::new(None, Duration::ZERO, Duration::from_secs(900), 0);
        for _ in 0..100 {
            gate.note_attempt(CLIENT).await.expect("unlimited");
        }
    }

    #[test]
    fn token_precedence_is_header_query_cookie() {
        let jar = CookieJar::new().add(Cookie::new(TOKEN_COOKIE_NAME, "from-cookie"));
        let bearer = TypedHeader(Authorization::bearer("from-header").expect("bearer header"));
        assert_eq!(
            presented_token(Some(&bearer), Some("from-query"), &jar).as_deref(),
            Some("from-header")
        );
        assert_eq!(
            presented_token(None, Some("from-query"), &jar).as_deref(),
            Some("from-query")
        );
        assert_eq!(
            presented_token(None, None, &jar).as_deref(),
            Some("from-cookie")
        );
        assert_eq!(presented_token(None, None, &CookieJar::new()), None);
    }
}
