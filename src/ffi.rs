use std::ffi::{c_char, CStr, CString};
use std::path::Path;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::dictionary::{CompiledDictionary, TermDictionary};
use crate::substitute::Mode;

static LAST_ERROR: Lazy<Mutex<Option<CString>>> = Lazy::new(|| Mutex::new(None));

fn set_last_error(msg: &str) {
    let c = CString::new(msg).unwrap_or_else(|_| CString::new("error").expect("cstr"));
    let mut guard = LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner());
    *guard = Some(c);
}

fn take_cstr(ptr: *const c_char, name: &str) -> Result<String, String> {
    if ptr.is_null() {
        return Err(format!("{name} is null"));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map(|s| s.to_string())
        .map_err(|_| format!("{name} is not valid UTF-8"))
}

fn translate_text(dictionary_path: &str, text: &str, mode: &str) -> anyhow::Result<CString> {
    let mode: Mode = mode.parse()?;
    let terms = TermDictionary::load(Path::new(dictionary_path))?;
    let dict = CompiledDictionary::compile(terms);
    let out = dict.substitute(text, mode);
    Ok(CString::new(out.as_bytes())?)
}

/// Substitutes `text` with the JSON dictionary at `dictionary_path`.
///
/// `mode` is one of `zh_only`, `bilingual` or `restore`. Returns a string to be released
/// with `rt_string_free`, or null on failure (see `rt_last_error_utf8()`).
#[no_mangle]
pub extern "C" fn rt_translate_text(
    dictionary_path: *const c_char,
    text: *const c_char,
    mode: *const c_char,
) -> *mut c_char {
    let args = take_cstr(dictionary_path, "dictionary_path").and_then(|d| {
        let t = take_cstr(text, "text")?;
        let m = take_cstr(mode, "mode")?;
        Ok((d, t, m))
    });
    let (dict_path, text, mode) = match args {
        Ok(v) => v,
        Err(e) => {
            set_last_error(&e);
            return std::ptr::null_mut();
        }
    };
    match translate_text(&dict_path, &text, &mode) {
        Ok(s) => s.into_raw(),
        Err(err) => {
            set_last_error(&format!("{err:#}"));
            std::ptr::null_mut()
        }
    }
}

/// Releases a string returned by `rt_translate_text`. Null is ignored.
#[no_mangle]
pub extern "C" fn rt_string_free(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    drop(unsafe { CString::from_raw(ptr) });
}

/// Returns the last error message as a UTF-8 C string pointer (or null if none).
/// The pointer is valid until the next failing call.
#[no_mangle]
pub extern "C" fn rt_last_error_utf8() -> *const c_char {
    let guard = LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner());
    match guard.as_ref() {
        Some(s) => s.as_ptr(),
        None => std::ptr::null(),
    }
}
