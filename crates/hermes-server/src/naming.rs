//! Component naming.
//!
//! A handler's full name is `System/Handler`. Both halves are derived from
//! the handler's Rust type path unless the handler overrides them:
//!
//! | Type path | System | Handler |
//! |---|---|---|
//! | `app::data_management_system::FileCatalogHandler` | `DataManagement` | `FileCatalog` |
//! | `app::framework_system::service::PingHandler` | `Framework` | `Ping` |
//! | `app::Ping` | `App` | `Ping` |

const SYSTEM_SUFFIX: &str = "_system";
const HANDLER_SUFFIX: &str = "Handler";

// Drops generic parameters: `a::B<c::D>` -> `a::B`.
fn base_path(type_path: &str) -> &str {
    type_path.split('<').next().unwrap_or(type_path)
}

/// Converts `snake_case` to `CamelCase`.
///
/// ```
/// assert_eq!(hermes_server::naming::camel_case("data_management"), "DataManagement");
/// ```
#[must_use]
pub fn camel_case(snake: &str) -> String {
    snake
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect::<String>()
            })
        })
        .collect()
}

/// System name for a type path.
///
/// The last module segment ending in `_system` wins. Without one, the crate
/// name stands in.
#[must_use]
pub fn system_name(type_path: &str) -> String {
    let path = base_path(type_path);
    let mut segments = path.split("::").collect::<Vec<_>>();
    // The last segment is the type itself.
    segments.pop();

    let system = segments.iter().rev().find_map(|segment| {
        let lower = segment.to_ascii_lowercase();
        lower
            .strip_suffix(SYSTEM_SUFFIX)
            .filter(|stem| !stem.is_empty())
            .map(camel_case)
    });

    system.unwrap_or_else(|| segments.first().map(|krate| camel_case(krate)).unwrap_or_default())
}

/// Handler name for a type path: the type name minus a trailing `Handler`.
#[must_use]
pub fn handler_name(type_path: &str) -> String {
    let name = base_path(type_path).rsplit("::").next().unwrap_or_default();
    match name.strip_suffix(HANDLER_SUFFIX) {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

/// Joins system and handler into the full component name.
#[must_use]
pub fn full_name(system: &str, handler: &str) -> String {
    format!("{system}/{handler}")
}
