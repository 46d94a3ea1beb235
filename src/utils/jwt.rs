//! JWT Token 管理与握手安全错误
//!
//! 提供 JWT token 的生成和验证功能；实时连接握手必须
//! 提供用户身份与有效凭证，role 声明决定注册为用户会话
//! 还是观察者会话。
//!
//! 安全错误以带严重级别的枚举表达，由传输边界穷尽匹配
//! 转换为对应的 HTTP 响应。

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// JWT 密钥 (生产环境应从环境变量或配置文件读取)
const JWT_SECRET: &[u8] = b"qanotify_jwt_secret_key_change_in_production";

/// Token 有效期 (秒) - 默认 24 小时
const TOKEN_EXPIRATION_SECS: u64 = 86400;

/// 观察者角色声明值
pub const ROLE_ADMIN: &str = "admin";
/// 普通用户角色声明值
pub const ROLE_USER: &str = "user";

/// JWT Claims (载荷)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// 用户ID
    pub sub: String,

    /// 用户名
    pub username: String,

    /// 角色（user/admin）
    pub role: String,

    /// 签发时间 (Unix timestamp)
    pub iat: u64,

    /// 过期时间 (Unix timestamp)
    pub exp: u64,
}

impl Claims {
    /// 创建新的 Claims
    pub fn new(user_id: String, username: String, role: String) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            sub: user_id,
            username,
            role,
            iat: now,
            exp: now + TOKEN_EXPIRATION_SECS,
        }
    }

    /// 是否为观察者（管理端）
    pub fn is_observer(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

/// 安全错误严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// 握手/凭证安全错误
///
/// 枚举各类安全失败，在传输边界穷尽匹配转换为响应
#[derive(Debug, Clone, thiserror::Error)]
pub enum SecurityError {
    /// 缺少用户身份
    #[error("missing user identity")]
    MissingIdentity,

    /// 缺少凭证
    #[error("missing credential")]
    MissingCredential,

    /// 凭证无效（签名/格式错误）
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// 凭证过期
    #[error("token expired")]
    ExpiredToken,

    /// 身份与凭证不一致
    #[error("identity mismatch: token issued for {0}")]
    IdentityMismatch(String),
}

impl SecurityError {
    /// 关联严重级别
    pub fn severity(&self) -> Severity {
        match self {
            Self::MissingIdentity | Self::MissingCredential => Severity::Low,
            Self::ExpiredToken => Severity::Medium,
            Self::InvalidToken(_) | Self::IdentityMismatch(_) => Severity::High,
        }
    }
}

/// 生成 JWT token
pub fn generate_token(
    user_id: &str,
    username: &str,
    role: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims::new(user_id.to_string(), username.to_string(), role.to_string());

    let header = Header::new(Algorithm::HS256);
    let encoding_key = EncodingKey::from_secret(JWT_SECRET);

    encode(&header, &claims, &encoding_key)
}

/// 验证 JWT token 并返回 Claims
pub fn verify_token(token: &str) -> Result<Claims, SecurityError> {
    let decoding_key = DecodingKey::from_secret(JWT_SECRET);
    let validation = Validation::new(Algorithm::HS256);

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => SecurityError::ExpiredToken,
            _ => SecurityError::InvalidToken(e.to_string()),
        })
}

/// 握手校验：身份 + 凭证齐备且一致才放行
///
/// 返回校验后的 Claims；任何缺失/不一致在连接注册前拒绝
pub fn authenticate_handshake(
    user_id: Option<&str>,
    token: Option<&str>,
) -> Result<Claims, SecurityError> {
    let user_id = match user_id {
        Some(id) if !id.is_empty() => id,
        _ => return Err(SecurityError::MissingIdentity),
    };
    let token = match token {
        Some(t) if !t.is_empty() => t,
        _ => return Err(SecurityError::MissingCredential),
    };

    let claims = verify_token(token)?;
    if claims.sub != user_id {
        return Err(SecurityError::IdentityMismatch(claims.sub));
    }

    Ok(claims)
}
