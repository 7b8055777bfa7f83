use bridge_domain::ToolChoice;

use crate::error::Error;

/// Provider neutral outcome of a [`ToolChoice`] plus allowed tool names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedToolChoice {
    None,
    Auto,
    Required,
    Function(String),
}

/// Resolves how the model may use `tool_names`.
///
/// A forced choice narrows to a single named function when exactly one
/// allowed name is given or only one tool is bound. Allowed names cannot
/// narrow an `Allowed` choice.
pub fn resolve_tool_choice(
    choice: Option<ToolChoice>,
    allowed_tool_names: &[String],
    tool_names: &[&str],
) -> Result<Option<ResolvedToolChoice>, Error> {
    let Some(choice) = choice else {
        return Ok(None);
    };

    let resolved = match choice {
        ToolChoice::Forbidden => ResolvedToolChoice::None,
        ToolChoice::Allowed if !allowed_tool_names.is_empty() => {
            return Err(Error::AllowedWithToolNames);
        }
        ToolChoice::Allowed => ResolvedToolChoice::Auto,
        ToolChoice::Forced => {
            if tool_names.is_empty() {
                return Err(Error::ForcedWithoutTools);
            }
            match allowed_tool_names {
                [] if tool_names.len() == 1 => ResolvedToolChoice::Function(tool_names[0].to_string()),
                [] => ResolvedToolChoice::Required,
                [name] => {
                    if !tool_names.contains(&name.as_str()) {
                        return Err(Error::UnknownAllowedTool(name.clone()));
                    }
                    ResolvedToolChoice::Function(name.clone())
                }
                _ => return Err(Error::TooManyAllowedTools),
            }
        }
    };
    Ok(Some(resolved))
}
