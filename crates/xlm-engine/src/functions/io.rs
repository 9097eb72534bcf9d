//! Built-ins with side effects outside the grid: virtual files, native calls staged through
//! `REGISTER`/`CALL`, and the `Kernel32` memory functions.

use super::text::{char_code, text_value};
use super::{CallSite, FunctionSpec};
use crate::emulator::{Emulator, RegisteredFunction};
use crate::value::{wrap_str_literal, EvalResult, EvalStatus, XlValue};

pub(super) const FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec { name: "FOPEN", min_args: 1, max_args: 2, implementation: fopen_fn },
    FunctionSpec { name: "FWRITE", min_args: 2, max_args: 2, implementation: fwrite_fn },
    FunctionSpec { name: "FWRITELN", min_args: 2, max_args: 2, implementation: fwriteln_fn },
    FunctionSpec { name: "FSIZE", min_args: 1, max_args: 1, implementation: fsize_fn },
    FunctionSpec { name: "FILES", min_args: 0, max_args: 2, implementation: files_fn },
    FunctionSpec { name: "CALL", min_args: 1, max_args: 255, implementation: call_fn },
    FunctionSpec { name: "REGISTER", min_args: 1, max_args: 255, implementation: register_fn },
    FunctionSpec { name: "REGISTER.ID", min_args: 2, max_args: 3, implementation: register_id_fn },
];

/// Procedures reachable as `Library.Procedure(...)`, keyed by procedure name.
pub(super) const NATIVE: &[FunctionSpec] = &[
    FunctionSpec { name: "VIRTUALALLOC", min_args: 2, max_args: 4, implementation: virtual_alloc_fn },
    FunctionSpec { name: "WRITEPROCESSMEMORY", min_args: 0, max_args: 255, implementation: write_process_memory_fn },
    FunctionSpec { name: "RTLCOPYMEMORY", min_args: 0, max_args: 255, implementation: rtl_copy_memory_fn },
];

const DEFAULT_FILE_NAME: &str = "default_name";
/// Largest region `VirtualAlloc` will back with a real buffer.
const MAX_ALLOCATION: u64 = 64 * 1024 * 1024;

fn fopen_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let name = em.arg(site, 0);
    let access = if site.has_arg(1) {
        em.arg(site, 1).value.to_string()
    } else {
        "1".to_string()
    };
    let file_name = if name.is_full() {
        text_value(&name)
    } else {
        DEFAULT_FILE_NAME.to_string()
    };
    em.state.files.open(&file_name, &access);
    log::debug!("FOPEN {file_name:?} ({access})");
    let text = format!("FOPEN({},{access})", name.text);
    EvalResult::new(name.status, XlValue::Text(file_name), text)
}

fn fwrite(em: &mut Emulator<'_>, site: &CallSite<'_>, line_end: &str) -> EvalResult {
    let handle = em.arg(site, 0);
    let content = em.arg(site, 1);
    let mut file_name = handle.value.to_string();
    if file_name.trim().is_empty() || handle.value.as_number().is_some() {
        file_name = em
            .state
            .files
            .first_name()
            .unwrap_or(DEFAULT_FILE_NAME)
            .to_string();
    }
    let content = content.unwrapped_text();
    let status = if em
        .state
        .files
        .append(&file_name, &format!("{content}{line_end}"))
    {
        EvalStatus::FullEvaluation
    } else {
        EvalStatus::PartialEvaluation
    };
    let text = format!(
        "{}({},{})",
        site.name.to_ascii_uppercase(),
        wrap_str_literal(&file_name, false),
        wrap_str_literal(&content, false)
    );
    EvalResult::new(status, XlValue::Number(0.0), text)
}

fn fwrite_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    fwrite(em, site, "")
}

fn fwriteln_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    fwrite(em, site, "\r\n")
}

fn fsize_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let name = em.arg(site, 0).unwrapped_text();
    match em.state.files.get(&name) {
        Some(file) => EvalResult::full(XlValue::Number(file.content.len() as f64)),
        None => EvalResult::new(EvalStatus::PartialEvaluation, XlValue::Number(0.0), "0"),
    }
}

/// `FILES(dir)` answers with the directory it was asked about.
fn files_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let dir = em.arg(site, 0).unwrapped_text();
    let text = format!("FILES({})", wrap_str_literal(&dir, false));
    EvalResult::full_with_text(XlValue::Text(dir), text)
}

/// Evaluate every argument, keeping the first status that was not a full evaluation.
fn evaluate_all(em: &mut Emulator<'_>, site: &CallSite<'_>) -> (EvalStatus, Vec<EvalResult>) {
    let mut status = EvalStatus::FullEvaluation;
    let mut results = Vec::with_capacity(site.args.len());
    for i in 0..site.args.len() {
        let result = em.arg(site, i);
        if !result.is_full() && status == EvalStatus::FullEvaluation {
            status = result.status;
        }
        results.push(result);
    }
    (status, results)
}

fn call_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let (status, args) = evaluate_all(em, site);
    let separator = em.syntax.list_separator.to_string();
    let rendered: Vec<&str> = args.iter().map(|a| a.text.as_str()).collect();
    let text = format!("CALL({})", rendered.join(&separator));
    EvalResult::new(status, XlValue::Number(0.0), text)
}

/// `REGISTER(lib, proc, signature, alias, ...)`: later calls to `alias` dispatch as `lib.proc`.
fn register_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    if site.args.len() < 4 {
        return EvalResult::error(site.source_text());
    }
    let (_, args) = evaluate_all(em, site);
    let texts: Vec<String> = args.iter().map(EvalResult::unwrapped_text).collect();
    let target = format!("{}.{}", texts[0], texts[1]);
    let alias = texts[3].to_ascii_lowercase();
    log::debug!("REGISTER {alias} -> {target}");
    em.state
        .registered
        .insert(alias, RegisteredFunction { target });
    EvalResult::full_with_text(XlValue::Number(0.0), format!("REGISTER({})", texts.join(",")))
}

fn register_id_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let library = em.arg(site, 0);
    let procedure = em.arg(site, 1);
    if !(library.is_full() && procedure.is_full()) {
        return EvalResult::partial(site.source_text());
    }
    let target = format!("{}.{}", text_value(&library), text_value(&procedure));
    EvalResult::full_with_text(XlValue::Text(target.clone()), wrap_str_literal(&target, true))
}

fn address_of(result: &EvalResult) -> Option<u64> {
    result.value.as_integer().and_then(|n| u64::try_from(n).ok())
}

/// Bytes of a string the way a native call receives it: one Windows-1252 byte per char.
fn string_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(char_code(c)).unwrap_or(b'?'))
        .collect()
}

fn virtual_alloc_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    let base = em.arg(site, 0);
    let size = em.arg(site, 1);
    if !(base.is_full() && size.is_full()) {
        return EvalResult::new(
            EvalStatus::PartialEvaluation,
            XlValue::Number(0.0),
            site.source_text(),
        );
    }
    let (Some(requested), Some(size)) = (address_of(&base), address_of(&size)) else {
        return EvalResult::error(site.source_text());
    };
    if size > MAX_ALLOCATION {
        log::warn!("refusing to allocate {size} bytes at {requested:#x}");
        return EvalResult::error(site.source_text());
    }
    let base = em.state.memory.alloc(requested, size);
    EvalResult::full_with_text(XlValue::Number(base as f64), site.source_text())
}

/// `WriteProcessMemory(process, base, buffer, size, written)`.
fn write_process_memory_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    if site.args.len() <= 4 {
        return EvalResult::partial(site.source_text());
    }
    let (status, args) = evaluate_all(em, site);
    if status != EvalStatus::FullEvaluation {
        return EvalResult::new(status, XlValue::Number(0.0), site.source_text());
    }
    let (Some(base), Some(size)) = (address_of(&args[1]), address_of(&args[3])) else {
        return EvalResult::error(site.source_text());
    };
    let data = string_bytes(&text_value(&args[2]));
    if !em.state.memory.write(base, &data, size) {
        log::debug!("rejected write of {size} bytes at {base:#x}");
        return EvalResult::error(site.source_text());
    }
    let text = format!(
        "Kernel32.WriteProcessMemory({},{base},\"{}\",{size},{})",
        args[0].text,
        hex::encode(&data),
        args[4].text
    );
    EvalResult::full_with_text(XlValue::Number(0.0), text)
}

/// `RtlCopyMemory(destination, source, size)`; the whole source string is copied.
fn rtl_copy_memory_fn(em: &mut Emulator<'_>, site: &CallSite<'_>) -> EvalResult {
    if site.args.len() != 3 {
        return EvalResult::partial(site.source_text());
    }
    let destination = em.arg(site, 0);
    let source = em.arg(site, 1);
    let size = em.arg(site, 2);
    if !(destination.is_full() && source.is_full()) {
        return EvalResult::partial(site.source_text());
    }
    let Some(base) = address_of(&destination) else {
        return EvalResult::error(site.source_text());
    };
    let data = string_bytes(&text_value(&source));
    if !em.state.memory.write(base, &data, data.len() as u64) {
        log::debug!("rejected copy of {} bytes to {base:#x}", data.len());
        return EvalResult::error(site.source_text());
    }
    let text = format!(
        "Kernel32.RtlCopyMemory({},\"{}\",{})",
        destination.text,
        hex::encode(&data),
        size.text
    );
    EvalResult::full_with_text(XlValue::Number(0.0), text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strings_become_cp1252_bytes() {
        assert_eq!(string_bytes("MZ"), b"MZ".to_vec());
        assert_eq!(string_bytes("\u{20AC}\u{ff}"), vec![128, 255]);
        assert_eq!(string_bytes("\u{4e2d}"), vec![b'?']);
    }
}
