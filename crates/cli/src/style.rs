//! Terminal styling helpers.

use console::Style;

/// Green check mark followed by `msg`.
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Red cross followed by `msg`.
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Branch name, with the trunk highlighted.
pub fn branch(name: &str, is_main: bool) -> String {
    if is_main {
        Style::new().cyan().bold().apply_to(name).to_string()
    } else {
        Style::new().cyan().apply_to(name).to_string()
    }
}

pub fn state_ready() -> String {
    let style = Style::new().green();
    format!("{} Ready", style.apply_to("●"))
}

pub fn state_not_ready(label: &str) -> String {
    let style = Style::new().dim();
    format!("{} {}", style.apply_to("○"), label)
}
