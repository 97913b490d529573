//! `atob` / `btoa` for the worker scope
//!
//! Both work on "binary strings": every UTF-16 code unit holds one byte.

use base64::{
    Engine as _, alphabet,
    engine::{GeneralPurpose, general_purpose},
};
use boa_engine::{Context, JsError, JsNativeError, JsResult, JsString, JsValue};

/// Forgiving decode: padding optional, stray trailing bits discarded
const FORGIVING: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    general_purpose::NO_PAD.with_decode_allow_trailing_bits(true),
);

/// Encode a binary string as base64
pub fn btoa(input: &str) -> Result<String, String> {
    let bytes = input
        .chars()
        .map(|c| u8::try_from(u32::from(c)).map_err(|_| format!("'{}' is outside the Latin1 range", c)))
        .collect::<Result<Vec<u8>, String>>()?;
    Ok(general_purpose::STANDARD.encode(bytes))
}

/// Decode base64 into a binary string
pub fn atob(input: &str) -> Result<String, String> {
    let mut compact: String = input
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\n' | '\x0c' | '\r'))
        .collect();
    if compact.len() % 4 == 0 {
        for _ in 0..2 {
            if compact.ends_with('=') {
                compact.pop();
            }
        }
    }
    if compact.len() % 4 == 1 {
        return Err("the string is not correctly encoded".to_string());
    }
    let bytes = FORGIVING
        .decode(compact.as_bytes())
        .map_err(|e| format!("the string is not correctly encoded: {}", e))?;
    Ok(bytes.into_iter().map(char::from).collect())
}

fn string_arg(args: &[JsValue], name: &str, context: &mut Context) -> JsResult<String> {
    let value = args.first().ok_or_else(|| {
        JsNativeError::typ().with_message(format!("{}: 1 argument required", name))
    })?;
    value
        .to_string(context)?
        .to_std_string()
        .map_err(|_| invalid_character(name, "lone surrogates cannot be encoded".to_string()))
}

fn invalid_character(name: &str, reason: String) -> JsError {
    JsNativeError::error()
        .with_message(format!("InvalidCharacterError: {}: {}", name, reason))
        .into()
}

pub(crate) fn js_btoa(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let input = string_arg(args, "btoa", context)?;
    let encoded = btoa(&input).map_err(|reason| invalid_character("btoa", reason))?;
    Ok(JsString::from(encoded.as_str()).into())
}

pub(crate) fn js_atob(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let input = string_arg(args, "atob", context)?;
    let decoded = atob(&input).map_err(|reason| invalid_character("atob", reason))?;
    Ok(JsString::from(decoded.as_str()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_btoa() {
        assert_eq!(btoa("hello").unwrap(), "aGVsbG8=");
        assert_eq!(btoa("").unwrap(), "");
        assert_eq!(btoa("\u{ff}\u{0}").unwrap(), "/wA=");
        assert!(btoa("€").is_err());
    }

    #[test]
    fn test_atob_is_forgiving() {
        assert_eq!(atob("aGVsbG8=").unwrap(), "hello");
        assert_eq!(atob("aGVsbG8").unwrap(), "hello");
        assert_eq!(atob(" aGVs\nbG8= ").unwrap(), "hello");
        assert_eq!(atob("/wA=").unwrap(), "\u{ff}\u{0}");
    }

    #[test]
    fn test_atob_rejects_garbage() {
        for input in ["a", "aGVsbG8*", "aGVsbG8==="] {
            assert!(atob(input).is_err(), "{} should be rejected", input);
        }
    }
}
