//! Macro substitution for prompt text.
//!
//! Every piece of persona-authored text (instructions, biographies, memory
//! contents) goes through [`resolve_template`] before it reaches a prompt.
//!
//! | Macro          | Value                                   |
//! |----------------|-----------------------------------------|
//! | `{{char}}`     | display name of the active persona       |
//! | `{{user}}`     | the user's name                          |
//! | `{{charbio}}`  | persona biography                        |
//! | `{{userbio}}`  | user biography                           |
//! | `{{date}}`     | e.g. `March 1, 2024`                     |
//! | `{{time}}`     | e.g. `14:05`                             |
//! | `{{datetime}}` | date and time                            |
//! | `{{weekday}}`  | e.g. `Friday`                            |
//!
//! Macro names are case-insensitive and may be padded with spaces. Unknown
//! macros are left untouched. Biographies may themselves use the name and
//! date macros; they are resolved once and never recursively.

use chrono::{Local, NaiveDateTime};

/// Values available to macro substitution.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub char_name: String,
    pub user_name: String,
    pub char_bio: String,
    pub user_bio: String,
    pub now: NaiveDateTime,
}

impl TemplateContext {
    pub fn new(char_name: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            char_name: char_name.into(),
            user_name: user_name.into(),
            char_bio: String::new(),
            user_bio: String::new(),
            now: Local::now().naive_local(),
        }
    }

    pub fn with_char_bio(mut self, bio: impl Into<String>) -> Self {
        self.char_bio = bio.into();
        self
    }

    pub fn with_user_bio(mut self, bio: impl Into<String>) -> Self {
        self.user_bio = bio.into();
        self
    }

    /// Pin the clock used by the date and time macros.
    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = now;
        self
    }

    fn lookup(&self, name: &str, allow_bios: bool) -> Option<String> {
        let value = match name {
            "char" => self.char_name.clone(),
            "user" => self.user_name.clone(),
            "charbio" if allow_bios => resolve(&self.char_bio, self, false),
            "userbio" if allow_bios => resolve(&self.user_bio, self, false),
            "date" => self.now.format("%B %-d, %Y").to_string(),
            "time" => self.now.format("%H:%M").to_string(),
            "datetime" => self.now.format("%B %-d, %Y %H:%M").to_string(),
            "weekday" => self.now.format("%A").to_string(),
            _ => return None,
        };
        Some(value)
    }
}

/// Replace every known `{{macro}}` in `text`.
pub fn resolve_template(text: &str, ctx: &TemplateContext) -> String {
    resolve(text, ctx, true)
}

fn resolve(text: &str, ctx: &TemplateContext, allow_bios: bool) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let name = after[..end].trim().to_ascii_lowercase();
        match ctx.lookup(&name, allow_bios) {
            Some(value) => out.push_str(&value),
            // Leave unknown macros as written
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}
