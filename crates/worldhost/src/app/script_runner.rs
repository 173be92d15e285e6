use std::collections::HashMap;

use serde_json::{json, Map, Value};
use tracing::info;
use worldsync::{
    parse_component, ActorId, ActorRecord, Axis, EventPayload, ScriptError, ScriptInvocation,
    ScriptRunner, TransformChannel, Vec3, WorldCommand, WorldScript,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LocalAction {
    Help,
    Echo { text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParsedLine {
    Local(LocalAction),
    Command(WorldCommand),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CommandParseError {
    reason: String,
    usage: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LineError {
    Usage(CommandParseError),
    MissingTarget,
}

impl LineError {
    fn usage(reason: impl Into<String>, usage: &str) -> Self {
        Self::Usage(CommandParseError {
            reason: reason.into(),
            usage: usage.to_string(),
        })
    }
}

/// What a line may refer to besides its own tokens.
pub(crate) struct LineContext<'a> {
    target: Option<&'a ActorId>,
}

impl LineContext<'_> {
    fn require_target(&self) -> Result<ActorId, LineError> {
        self.target.cloned().ok_or(LineError::MissingTarget)
    }
}

type ParseFn = dyn Fn(&[String], &LineContext<'_>) -> Result<ParsedLine, LineError> + Send + Sync;
type BuiltinParse = fn(&[String], &LineContext<'_>) -> Result<ParsedLine, LineError>;

pub(crate) struct CommandSpec {
    name: String,
    help: String,
    arg_schema: String,
    parse: Box<ParseFn>,
}

pub(crate) struct ScriptCommandRegistry {
    specs: Vec<CommandSpec>,
    lookup_by_lower_name: HashMap<String, usize>,
}

impl ScriptCommandRegistry {
    pub(crate) fn new() -> Self {
        Self {
            specs: Vec::new(),
            lookup_by_lower_name: HashMap::new(),
        }
    }

    pub(crate) fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, &str, &str, BuiltinParse); 13] = [
            ("help", "Log the available commands", "", parse_help_command),
            ("move", "Set target position", "<x> <y> <z>", parse_move_command),
            ("rotate", "Set target rotation", "<x> <y> <z>", parse_rotate_command),
            ("scale", "Set target scaling", "<x> <y> <z>", parse_scale_command),
            (
                "component",
                "Set one transform component",
                "<position|rotation|scaling> <x|y|z> <value>",
                parse_component_command,
            ),
            ("state", "Merge a persisted state field", "<key> <json>", parse_state_command),
            ("local", "Set a local-only state field", "<key> <json>", parse_local_command),
            ("on", "Bind an event to a script", "<event> <path>", parse_on_command),
            ("send", "Send an event", "<event> [actor_id|*]", parse_send_command),
            ("remove", "Remove target and its children", "", parse_remove_command),
            (
                "spawn",
                "Create an actor",
                "<kind> <name> [builder]",
                parse_spawn_command,
            ),
            ("run", "Run a script once it is loaded", "<path>", parse_run_command),
            ("echo", "Log text", "<text...>", parse_echo_command),
        ];
        for (name, help, arg_schema, parse) in builtins {
            registry.push_spec(name, help, arg_schema, Box::new(parse));
        }
        registry
    }

    #[cfg(test)]
    pub(crate) fn register<F>(
        &mut self,
        name: impl Into<String>,
        help: impl Into<String>,
        arg_schema: impl Into<String>,
        parse: F,
    ) -> Result<(), String>
    where
        F: Fn(&[String], &LineContext<'_>) -> Result<ParsedLine, LineError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err("command name cannot be empty".to_string());
        }
        if self
            .lookup_by_lower_name
            .contains_key(&name.to_ascii_lowercase())
        {
            return Err(format!("duplicate command registration: {name}"));
        }
        self.push_spec(name, help, arg_schema, Box::new(parse));
        Ok(())
    }

    fn push_spec(
        &mut self,
        name: impl Into<String>,
        help: impl Into<String>,
        arg_schema: impl Into<String>,
        parse: Box<ParseFn>,
    ) {
        let name = name.into();
        self.lookup_by_lower_name
            .insert(name.to_ascii_lowercase(), self.specs.len());
        self.specs.push(CommandSpec {
            name,
            help: help.into(),
            arg_schema: arg_schema.into(),
            parse,
        });
    }

    pub(crate) fn lookup(&self, input_name: &str) -> Option<&CommandSpec> {
        let lower = input_name.to_ascii_lowercase();
        let index = self.lookup_by_lower_name.get(&lower)?;
        self.specs.get(*index)
    }

    pub(crate) fn iter_specs_in_order(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.specs.iter().map(|spec| {
            (
                spec.name.as_str(),
                spec.help.as_str(),
                spec.arg_schema.as_str(),
            )
        })
    }
}

/// Runs world scripts written as one command per line. `$target`, `$event`
/// and `$<key>` expand from the invocation before parsing.
pub(crate) struct CommandScriptRunner {
    registry: ScriptCommandRegistry,
}

impl Default for CommandScriptRunner {
    fn default() -> Self {
        Self {
            registry: ScriptCommandRegistry::with_builtins(),
        }
    }
}

impl CommandScriptRunner {
    #[cfg(test)]
    pub(crate) fn registry_mut(&mut self) -> &mut ScriptCommandRegistry {
        &mut self.registry
    }
}

impl ScriptRunner for CommandScriptRunner {
    fn run(
        &mut self,
        script: &WorldScript,
        invocation: &ScriptInvocation,
    ) -> Result<Vec<WorldCommand>, ScriptError> {
        let context = LineContext {
            target: invocation.target.as_ref(),
        };
        let mut commands = Vec::new();

        for (index, raw_line) in script.code.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw_line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let tokens = tokenize_line(trimmed).map_err(|reason| ScriptError::InvalidArguments {
                line,
                reason,
                usage: "<command> [args...]".to_string(),
            })?;
            let Some((command_name, raw_args)) = tokens.split_first() else {
                continue;
            };
            let Some(spec) = self.registry.lookup(command_name) else {
                return Err(ScriptError::UnknownCommand {
                    line,
                    command: command_name.clone(),
                });
            };
            let args = expand_variables(raw_args, invocation).map_err(|reason| {
                ScriptError::InvalidArguments {
                    line,
                    reason,
                    usage: format!("{} {}", spec.name, spec.arg_schema),
                }
            })?;

            match (spec.parse)(&args, &context) {
                Ok(ParsedLine::Command(command)) => commands.push(command),
                Ok(ParsedLine::Local(LocalAction::Help)) => {
                    for (name, help, arg_schema) in self.registry.iter_specs_in_order() {
                        info!(name, arg_schema, help, "script_help");
                    }
                }
                Ok(ParsedLine::Local(LocalAction::Echo { text })) => {
                    info!(script = %script.path, line, text = text.as_str(), "script_echo");
                }
                Err(LineError::Usage(error)) => {
                    return Err(ScriptError::InvalidArguments {
                        line,
                        reason: error.reason,
                        usage: error.usage,
                    });
                }
                Err(LineError::MissingTarget) => return Err(ScriptError::MissingTarget { line }),
            }
        }
        Ok(commands)
    }
}

fn expand_variables(args: &[String], invocation: &ScriptInvocation) -> Result<Vec<String>, String> {
    args.iter()
        .map(|arg| {
            let Some(name) = arg.strip_prefix('$') else {
                return Ok(arg.clone());
            };
            match name {
                "target" => invocation
                    .target
                    .as_ref()
                    .map(|target| target.as_str().to_string())
                    .ok_or_else(|| "$target used without a target actor".to_string()),
                "event" => invocation
                    .event
                    .clone()
                    .ok_or_else(|| "$event used outside an event handler".to_string()),
                key => match invocation.data.get(key) {
                    Some(Value::String(text)) => Ok(text.clone()),
                    Some(value) => Ok(value.to_string()),
                    None => Err(format!("unknown variable '${key}'")),
                },
            }
        })
        .collect()
}

fn tokenize_line(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut seen_token_content = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                seen_token_content = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if seen_token_content {
                    tokens.push(std::mem::take(&mut current));
                    seen_token_content = false;
                }
            }
            _ => {
                current.push(ch);
                seen_token_content = true;
            }
        }
    }

    if in_quotes {
        return Err("unterminated quoted string".to_string());
    }
    if seen_token_content {
        tokens.push(current);
    }
    Ok(tokens)
}

fn parse_help_command(args: &[String], _context: &LineContext<'_>) -> Result<ParsedLine, LineError> {
    if !args.is_empty() {
        return Err(LineError::usage("unexpected extra arguments", "help"));
    }
    Ok(ParsedLine::Local(LocalAction::Help))
}

fn parse_move_command(args: &[String], context: &LineContext<'_>) -> Result<ParsedLine, LineError> {
    parse_transform(args, context, TransformChannel::Position, "move <x> <y> <z>")
}

fn parse_rotate_command(
    args: &[String],
    context: &LineContext<'_>,
) -> Result<ParsedLine, LineError> {
    parse_transform(args, context, TransformChannel::Rotation, "rotate <x> <y> <z>")
}

fn parse_scale_command(args: &[String], context: &LineContext<'_>) -> Result<ParsedLine, LineError> {
    parse_transform(args, context, TransformChannel::Scaling, "scale <x> <y> <z>")
}

fn parse_transform(
    args: &[String],
    context: &LineContext<'_>,
    channel: TransformChannel,
    usage: &str,
) -> Result<ParsedLine, LineError> {
    if args.len() != 3 {
        return Err(LineError::usage("expected exactly three numbers", usage));
    }
    let value = Vec3::new(
        parse_number(&args[0], usage)?,
        parse_number(&args[1], usage)?,
        parse_number(&args[2], usage)?,
    );
    Ok(ParsedLine::Command(WorldCommand::SetTransform {
        actor: context.require_target()?,
        channel,
        value,
    }))
}

fn parse_component_command(
    args: &[String],
    context: &LineContext<'_>,
) -> Result<ParsedLine, LineError> {
    const USAGE: &str = "component <position|rotation|scaling> <x|y|z> <value>";
    if args.len() != 3 {
        return Err(LineError::usage("expected <channel> <axis> <value>", USAGE));
    }
    let channel = TransformChannel::ALL
        .into_iter()
        .find(|channel| channel.name().eq_ignore_ascii_case(&args[0]))
        .ok_or_else(|| LineError::usage(format!("unknown channel '{}'", args[0]), USAGE))?;
    let axis = match args[1].to_ascii_lowercase().as_str() {
        "x" => Axis::X,
        "y" => Axis::Y,
        "z" => Axis::Z,
        _ => {
            return Err(LineError::usage(
                format!("unknown axis '{}' (expected x|y|z)", args[1]),
                USAGE,
            ));
        }
    };
    Ok(ParsedLine::Command(WorldCommand::SetComponent {
        actor: context.require_target()?,
        channel,
        axis,
        value: parse_number(&args[2], USAGE)?,
    }))
}

fn parse_state_command(args: &[String], context: &LineContext<'_>) -> Result<ParsedLine, LineError> {
    let (key, value) = parse_key_value(args, "state <key> <json>")?;
    let mut fields = Map::new();
    fields.insert(key, value);
    Ok(ParsedLine::Command(WorldCommand::SetState {
        actor: context.require_target()?,
        fields,
    }))
}

fn parse_local_command(args: &[String], context: &LineContext<'_>) -> Result<ParsedLine, LineError> {
    let (key, value) = parse_key_value(args, "local <key> <json>")?;
    Ok(ParsedLine::Command(WorldCommand::SetLocalState {
        actor: context.require_target()?,
        key,
        value,
    }))
}

fn parse_on_command(args: &[String], context: &LineContext<'_>) -> Result<ParsedLine, LineError> {
    if args.len() != 2 {
        return Err(LineError::usage(
            "expected <event> <path>",
            "on <event> <path>",
        ));
    }
    Ok(ParsedLine::Command(WorldCommand::BindHandler {
        actor: context.require_target()?,
        event: args[0].clone(),
        path: args[1].clone(),
        options: None,
    }))
}

fn parse_send_command(args: &[String], _context: &LineContext<'_>) -> Result<ParsedLine, LineError> {
    let payload = match args {
        [_] => EventPayload::broadcast(),
        [_, target] if target == "*" => EventPayload::broadcast(),
        [_, target] => EventPayload::targeted(target.as_str()),
        _ => {
            return Err(LineError::usage(
                "expected <event> or <event> <actor_id>",
                "send <event> [actor_id|*]",
            ));
        }
    };
    Ok(ParsedLine::Command(WorldCommand::SendEvent {
        event: args[0].clone(),
        payload,
    }))
}

fn parse_remove_command(args: &[String], context: &LineContext<'_>) -> Result<ParsedLine, LineError> {
    if !args.is_empty() {
        return Err(LineError::usage("unexpected extra arguments", "remove"));
    }
    Ok(ParsedLine::Command(WorldCommand::Remove {
        actor: context.require_target()?,
    }))
}

fn parse_spawn_command(args: &[String], _context: &LineContext<'_>) -> Result<ParsedLine, LineError> {
    let (kind, name, builder) = match args {
        [kind, name] => (kind, name, None),
        [kind, name, builder] => (kind, name, Some(builder)),
        _ => {
            return Err(LineError::usage(
                "expected <kind> <name> [builder]",
                "spawn <kind> <name> [builder]",
            ));
        }
    };
    let record = ActorRecord {
        kind: kind.clone(),
        name: name.clone(),
        primitive: builder.map(|builder| vec![json!(builder), json!(name)]),
        ..ActorRecord::default()
    };
    Ok(ParsedLine::Command(WorldCommand::Spawn(record)))
}

fn parse_run_command(args: &[String], _context: &LineContext<'_>) -> Result<ParsedLine, LineError> {
    match args {
        [path] => Ok(ParsedLine::Command(WorldCommand::RunScriptWhenLoaded {
            path: path.clone(),
        })),
        _ => Err(LineError::usage("expected exactly one <path>", "run <path>")),
    }
}

fn parse_echo_command(args: &[String], _context: &LineContext<'_>) -> Result<ParsedLine, LineError> {
    if args.is_empty() {
        return Err(LineError::usage(
            "missing required argument <text...>",
            "echo <text...>",
        ));
    }
    Ok(ParsedLine::Local(LocalAction::Echo {
        text: args.join(" "),
    }))
}

fn parse_key_value(args: &[String], usage: &str) -> Result<(String, Value), LineError> {
    let [key, raw] = args else {
        return Err(LineError::usage("expected <key> <json>", usage));
    };
    let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.clone()));
    Ok((key.clone(), value))
}

fn parse_number(raw: &str, usage: &str) -> Result<f32, LineError> {
    parse_component(raw.into())
        .map_err(|_| LineError::usage(format!("invalid number '{raw}' (expected f32)"), usage))
}
