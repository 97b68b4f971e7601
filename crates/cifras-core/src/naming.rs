/// Reserved tab name used by the UI for the "create tab" affordance.
pub const CREATE_TAB_AFFORDANCE: &str = "+";

pub fn sanitize_kebab(input: &str) -> String {
    let mut output = String::new();
    let mut was_dash = false;
    for ch in input.chars() {
        if ch.is_alphanumeric() {
            output.extend(ch.to_lowercase());
            was_dash = false;
        } else if !was_dash {
            output.push('-');
            was_dash = true;
        }
    }
    let trimmed = output.trim_matches('-').to_string();
    if trimmed.is_empty() {
        "tab".to_string()
    } else {
        trimmed
    }
}

/// Caption shown under an image: the file name without its last extension.
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(ix) if ix > 0 && ix + 1 < name.len() => &name[..ix],
        _ => name,
    }
}

pub fn is_image_mime(mime_type: &str) -> bool {
    mime_type.trim().to_ascii_lowercase().starts_with("image/")
}

pub fn contains_case_insensitive(haystack: &str, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    needle.is_empty() || haystack.to_lowercase().contains(&needle)
}
