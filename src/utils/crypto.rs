// 签名工具函数
// 易支付参数规范化、MD5/RSA 签名与验签，以及平台 webhook 的 HMAC 校验

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::Rsa;
use openssl::sign::{Signer, Verifier};
use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::SignScheme;

type HmacSha256 = Hmac<Sha256>;

/// 签名错误
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SigningError {
    #[error("signing key is missing")]
    MissingKey,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("signature encoding is invalid")]
    MalformedSignature,

    #[error("signature mismatch")]
    Mismatch,

    #[error("crypto failure: {0}")]
    Crypto(String),
}

impl From<openssl::error::ErrorStack> for SigningError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        SigningError::Crypto(err.to_string())
    }
}

/// 构建待签名字符串
///
/// 去掉 `sign`、`sign_type` 和空值字段，按键的字节序排序后以 `&` 连接。
///
/// # Arguments
/// * `params` - 请求参数
///
/// # Returns
/// * 规范化后的字符串，参数为空时返回空串
pub fn canonicalize<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut pairs: Vec<(&String, &String)> = params
        .into_iter()
        .filter(|(k, v)| k.as_str() != "sign" && k.as_str() != "sign_type" && !v.is_empty())
        .collect();
    pairs.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// MD5 签名: md5(规范化字符串 + 密钥)，小写十六进制
pub fn md5_sign(content: &str, secret: &str) -> String {
    format!("{:x}", md5::compute(format!("{}{}", content, secret)))
}

/// RSA-SHA256 签名，结果为 base64
pub fn rsa_sign(content: &str, private_key: &str) -> Result<String, SigningError> {
    let key = load_private_key(private_key)?;
    let mut signer = Signer::new(MessageDigest::sha256(), &key)?;
    signer.update(content.as_bytes())?;
    let signature = signer.sign_to_vec()?;
    Ok(STANDARD.encode(signature))
}

/// RSA-SHA256 验签
pub fn rsa_verify(content: &str, signature: &str, public_key: &str) -> Result<bool, SigningError> {
    let key = load_public_key(public_key)?;
    let raw = STANDARD
        .decode(signature.trim())
        .map_err(|_| SigningError::MalformedSignature)?;
    let mut verifier = Verifier::new(MessageDigest::sha256(), &key)?;
    verifier.update(content.as_bytes())?;
    Ok(verifier.verify(&raw)?)
}

/// 按签名方式为参数签名
///
/// # Arguments
/// * `scheme` - 签名方式
/// * `params` - 请求参数 (sign/sign_type 会被忽略)
/// * `key` - MD5 密钥或 RSA 私钥
pub fn sign_params<'a, I>(scheme: SignScheme, params: I, key: &str) -> Result<String, SigningError>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    if key.trim().is_empty() {
        return Err(SigningError::MissingKey);
    }
    let content = canonicalize(params);
    match scheme {
        SignScheme::Md5 => Ok(md5_sign(&content, key)),
        SignScheme::Rsa => rsa_sign(&content, key),
    }
}

/// 按签名方式校验参数签名
///
/// # Arguments
/// * `scheme` - 签名方式
/// * `params` - 收到的参数，其中的 sign 字段不参与计算
/// * `signature` - 收到的签名
/// * `key` - MD5 密钥或 RSA 公钥
pub fn verify_params<'a, I>(
    scheme: SignScheme,
    params: I,
    signature: &str,
    key: &str,
) -> Result<bool, SigningError>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    if key.trim().is_empty() {
        return Err(SigningError::MissingKey);
    }
    let content = canonicalize(params);
    match scheme {
        SignScheme::Md5 => Ok(constant_time_eq(&md5_sign(&content, key), signature)),
        SignScheme::Rsa => rsa_verify(&content, signature, key),
    }
}

// 支持完整 PEM 与去掉首尾行的 base64 密钥体
fn load_private_key(material: &str) -> Result<PKey<Private>, SigningError> {
    let material = material.trim();
    if material.starts_with("-----BEGIN") {
        return PKey::private_key_from_pem(material.as_bytes())
            .map_err(|e| SigningError::InvalidKey(e.to_string()));
    }
    let der = decode_key_body(material)?;
    PKey::private_key_from_der(&der)
        .or_else(|_| Rsa::private_key_from_der(&der).and_then(PKey::from_rsa))
        .map_err(|e| SigningError::InvalidKey(e.to_string()))
}

fn load_public_key(material: &str) -> Result<PKey<Public>, SigningError> {
    let material = material.trim();
    if material.starts_with("-----BEGIN") {
        return PKey::public_key_from_pem(material.as_bytes())
            .or_else(|_| {
                Rsa::public_key_from_pem_pkcs1(material.as_bytes()).and_then(PKey::from_rsa)
            })
            .map_err(|e| SigningError::InvalidKey(e.to_string()));
    }
    let der = decode_key_body(material)?;
    PKey::public_key_from_der(&der)
        .or_else(|_| Rsa::public_key_from_der_pkcs1(&der).and_then(PKey::from_rsa))
        .map_err(|e| SigningError::InvalidKey(e.to_string()))
}

fn decode_key_body(material: &str) -> Result<Vec<u8>, SigningError> {
    let compact: String = material.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| SigningError::InvalidKey(e.to_string()))
}

/// SHA-256 摘要前8位十六进制，用作订单短标识
pub fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..8].to_string()
}

/// 生成HMAC-SHA256签名
///
/// # Arguments
/// * `message` - 要签名的消息
/// * `secret` - 签名密钥
///
/// # Returns
/// * 十六进制格式的签名字符串
pub fn generate_hmac_signature(message: &[u8], secret: &str) -> Result<String, SigningError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// 验证HMAC-SHA256签名 (十六进制，忽略大小写)
pub fn verify_hmac_signature(message: &[u8], signature: &str, secret: &str) -> Result<bool, SigningError> {
    let expected = generate_hmac_signature(message, secret)?;
    Ok(constant_time_eq(&expected, &signature.trim().to_ascii_lowercase()))
}

/// 常量时间字符串比较 (防止时序攻击)
///
/// # Arguments
/// * `a` - 字符串A
/// * `b` - 字符串B
///
/// # Returns
/// * 字符串是否相等
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}

/// 生成随机字母数字串
pub fn random_alphanumeric(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
