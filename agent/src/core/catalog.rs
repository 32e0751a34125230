//! Declarative registry of the actions the agent may take.
//!
//! Each entry carries a parameter schema, a rendering template and a position
//! map used to parse rendered strings back into arguments. Catalogs are
//! composed per agent configuration from the base world actions plus the
//! optional introspection and subtask-control extensions.

use std::sync::LazyLock;

use jsonschema::Draft;
use regex::{Captures, Regex};
use serde_json::{Map, Value, json};

use crate::core::error::ContractError;
use crate::core::types::{Action, Args};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder regex"));

/// Kind of value a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Free text (object or receptacle type, thoughts, labels).
    Text,
    /// Non-negative integer index.
    Index,
}

impl ParamKind {
    fn json_type(self) -> &'static str {
        match self {
            Self::Text => "string",
            Self::Index => "integer",
        }
    }
}

/// Where a parameter's value sits in the space-split action string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// A single token at this index.
    At(usize),
    /// Every token from this index onward, joined with spaces.
    Rest(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct ParamDef {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ParamKind,
    pub position: Position,
}

#[derive(Debug, Clone, Copy)]
pub struct ActionDef {
    pub name: &'static str,
    pub description: &'static str,
    pub template: &'static str,
    /// Leading token that identifies the action (defaults to `name`).
    pub match_prefix: Option<&'static str>,
    pub params: &'static [ParamDef],
    /// Introspective actions never reach the simulation and observe `OK.`.
    pub introspective: bool,
}

impl ActionDef {
    pub fn prefix(&self) -> &'static str {
        self.match_prefix.unwrap_or(self.name)
    }
}

const fn text(name: &'static str, description: &'static str, at: usize) -> ParamDef {
    ParamDef {
        name,
        description,
        kind: ParamKind::Text,
        position: Position::At(at),
    }
}

const fn index(name: &'static str, description: &'static str, at: usize) -> ParamDef {
    ParamDef {
        name,
        description,
        kind: ParamKind::Index,
        position: Position::At(at),
    }
}

const OBJECT_FROM_RECEP: [ParamDef; 4] = [
    text("object", "The type of the object", 1),
    index("object_idx", "The index of the object", 2),
    text("recep", "The type of the location or receptacle", 4),
    index("recep_idx", "The index of the location or receptacle", 5),
];

const OBJECT_WITH_RECEP: [ParamDef; 4] = [
    text("object", "The type of the object", 1),
    index("object_idx", "The index of the object", 2),
    text("recep", "The type of the receptacle", 4),
    index("recep_idx", "The index of the receptacle", 5),
];

const RECEP: [ParamDef; 2] = [
    text("recep", "The type of the receptacle", 1),
    index("recep_idx", "The index of the receptacle", 2),
];

const OBJECT: [ParamDef; 2] = [
    text("object", "The type of the object", 1),
    index("object_idx", "The index of the object", 2),
];

const GOTO: [ParamDef; 2] = [
    text("recep", "The type of the location or receptacle", 2),
    index("recep_idx", "The index of the location or receptacle", 3),
];

const TOGGLE: [ParamDef; 2] = [
    text("type", "The type of the object or receptacle", 1),
    index("idx", "The index of the object or receptacle", 2),
];

const fn world(
    name: &'static str,
    description: &'static str,
    template: &'static str,
    params: &'static [ParamDef],
) -> ActionDef {
    ActionDef {
        name,
        description,
        template,
        match_prefix: None,
        params,
        introspective: false,
    }
}

/// Base world-interaction actions.
pub const WORLD_ACTIONS: &[ActionDef] = &[
    ActionDef {
        match_prefix: Some("go"),
        ..world(
            "goto",
            "Go to a location or receptacle",
            "go to {recep} {recep_idx}",
            &GOTO,
        )
    },
    world(
        "take",
        "Take an object from a location or receptacle",
        "take {object} {object_idx} from {recep} {recep_idx}",
        &OBJECT_FROM_RECEP,
    ),
    world(
        "put",
        "Put an object in or on a location or receptacle",
        "put {object} {object_idx} in/on {recep} {recep_idx}",
        &OBJECT_FROM_RECEP,
    ),
    world("open", "Open a receptacle", "open {recep} {recep_idx}", &RECEP),
    world("close", "Close a receptacle", "close {recep} {recep_idx}", &RECEP),
    world(
        "toggle",
        "Turn an object or receptacle on or off",
        "toggle {type} {idx}",
        &TOGGLE,
    ),
    world(
        "clean",
        "Clean an object with a receptacle",
        "clean {object} {object_idx} with {recep} {recep_idx}",
        &OBJECT_WITH_RECEP,
    ),
    world(
        "heat",
        "Heat an object with a receptacle",
        "heat {object} {object_idx} with {recep} {recep_idx}",
        &OBJECT_WITH_RECEP,
    ),
    world(
        "cool",
        "Cool an object with a receptacle",
        "cool {object} {object_idx} with {recep} {recep_idx}",
        &OBJECT_WITH_RECEP,
    ),
    world(
        "use",
        "Use an object, such as switching on a lamp",
        "use {object} {object_idx}",
        &OBJECT,
    ),
    world(
        "examine",
        "Look closely at an object or receptacle",
        "examine {object} {object_idx}",
        &OBJECT,
    ),
    world("look", "Look around the current location", "look", &[]),
    world(
        "inventory",
        "List the objects you are carrying",
        "inventory",
        &[],
    ),
];

/// Introspection extension.
pub const THINK_ACTIONS: &[ActionDef] = &[ActionDef {
    name: "think",
    description: "Express your thoughts about what to do next",
    template: "think: {thought}",
    match_prefix: Some("think:"),
    params: &[ParamDef {
        name: "thought",
        description: "A sentence or two of your thoughts",
        kind: ParamKind::Text,
        position: Position::Rest(1),
    }],
    introspective: true,
}];

pub const FINISH_SUBTASK: &str = "finish_subtask";
pub const REPLACE_SUBTASK: &str = "replace_subtask";

/// Subtask-control extension.
pub const SUBTASK_CONTROL_ACTIONS: &[ActionDef] = &[
    ActionDef {
        name: FINISH_SUBTASK,
        description: "Declare that the current subtask is complete",
        template: "finish subtask",
        match_prefix: Some("finish"),
        params: &[],
        introspective: true,
    },
    ActionDef {
        name: REPLACE_SUBTASK,
        description: "Abort the current subtask and replace it with a different one",
        template: "replace subtask: {subtask}",
        match_prefix: Some("replace"),
        params: &[ParamDef {
            name: "subtask",
            description: "A short description of the replacement subtask",
            kind: ParamKind::Text,
            position: Position::Rest(2),
        }],
        introspective: true,
    },
];

/// Which optional extensions a catalog exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionSet {
    pub think: bool,
    pub subtask_control: bool,
}

/// Read-only view over a selected set of action definitions.
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<&'static ActionDef>,
}

impl Catalog {
    pub fn new(set: ActionSet) -> Self {
        let mut entries: Vec<&'static ActionDef> = WORLD_ACTIONS.iter().collect();
        if set.think {
            entries.extend(THINK_ACTIONS);
        }
        if set.subtask_control {
            entries.extend(SUBTASK_CONTROL_ACTIONS);
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[&'static ActionDef] {
        &self.entries
    }

    /// Base world actions included in this catalog.
    pub fn world_actions(&self) -> impl Iterator<Item = &'static ActionDef> + '_ {
        self.entries
            .iter()
            .copied()
            .filter(|def| !def.introspective)
    }

    /// Look up an action's description and parameter list.
    pub fn describe(&self, name: &str) -> Result<&'static ActionDef, ContractError> {
        self.entries
            .iter()
            .copied()
            .find(|def| def.name == name)
            .ok_or_else(|| ContractError::UnknownAction {
                name: name.to_string(),
            })
    }

    /// Unknown names are not introspective.
    pub fn is_introspective(&self, name: &str) -> bool {
        self.describe(name).is_ok_and(|def| def.introspective)
    }

    /// Substitute `args` into the action's template.
    ///
    /// Placeholders are filled in one pass over the template, so values are
    /// copied verbatim even when they contain `{name}` text themselves.
    pub fn render(&self, name: &str, args: &Args) -> Result<String, ContractError> {
        let def = self.describe(name)?;
        for param in def.params {
            let value = args
                .get(param.name)
                .ok_or_else(|| invalid(def, format!("missing parameter '{}'", param.name)))?;
            check_kind(def, param, value)?;
        }
        let rendered = PLACEHOLDER_RE.replace_all(def.template, |caps: &Captures<'_>| {
            match args.get(&caps[1]) {
                Some(value) if def.params.iter().any(|param| param.name == &caps[1]) => {
                    value.clone()
                }
                _ => caps[0].to_string(),
            }
        });
        Ok(rendered.into_owned())
    }

    /// Render an [`Action`] value.
    pub fn render_action(&self, action: &Action) -> Result<String, ContractError> {
        self.render(&action.name, &action.args)
    }

    /// Parse a rendered action string back into name and arguments.
    ///
    /// Tokens past the last positional parameter are ignored, so
    /// `go to cabinet 1 now` parses as `goto` on `cabinet 1`.
    pub fn parse(&self, input: &str) -> Result<Action, ContractError> {
        let tokens: Vec<&str> = input.trim().split(' ').collect();
        let leading = tokens.first().copied().unwrap_or_default();
        let def = self
            .entries
            .iter()
            .copied()
            .find(|def| def.prefix() == leading)
            .ok_or_else(|| ContractError::NoMatchingAction {
                input: input.to_string(),
            })?;

        let mut args = Args::new();
        for param in def.params {
            let value = match param.position {
                Position::At(at) => tokens
                    .get(at)
                    .map(|token| token.to_string())
                    .ok_or_else(|| invalid(def, format!("no token for '{}'", param.name)))?,
                Position::Rest(from) => tokens.get(from..).unwrap_or_default().join(" "),
            };
            check_kind(def, param, &value)?;
            args.insert(param.name.to_string(), value);
        }
        Ok(Action::new(def.name, args))
    }

    /// Function specifications for structured-output-capable models.
    pub fn specs(&self) -> Vec<Value> {
        self.entries.iter().map(|def| spec(def)).collect()
    }

    /// Validate a structured selection and normalize it to string arguments.
    ///
    /// Index parameters may arrive as JSON integers or digit strings. Unknown
    /// keys are dropped so that recorded actions compare structurally.
    pub fn arguments_from_json(&self, name: &str, arguments: &Value) -> Result<Args, ContractError> {
        let def = self.describe(name)?;
        let schema = lenient_schema(def);
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .map_err(|err| invalid(def, format!("compile schema: {err}")))?;
        let messages: Vec<String> = validator
            .iter_errors(arguments)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            return Err(invalid(def, messages.join("; ")));
        }

        let mut args = Args::new();
        for param in def.params {
            let value = match arguments.get(param.name) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => return Err(invalid(def, format!("missing parameter '{}'", param.name))),
            };
            args.insert(param.name.to_string(), value);
        }
        Ok(args)
    }

    /// JSON arguments for a recorded action, with index parameters as integers.
    pub fn call_arguments(&self, name: &str, args: &Args) -> Result<Value, ContractError> {
        let def = self.describe(name)?;
        let mut object = Map::new();
        for param in def.params {
            let Some(value) = args.get(param.name) else {
                continue;
            };
            let json_value = match (param.kind, value.parse::<u64>()) {
                (ParamKind::Index, Ok(n)) => Value::from(n),
                _ => Value::String(value.clone()),
            };
            object.insert(param.name.to_string(), json_value);
        }
        Ok(Value::Object(object))
    }
}

fn invalid(def: &ActionDef, reason: String) -> ContractError {
    ContractError::InvalidParameters {
        action: def.name.to_string(),
        reason,
    }
}

fn check_kind(def: &ActionDef, param: &ParamDef, value: &str) -> Result<(), ContractError> {
    if param.kind == ParamKind::Index && value.parse::<u64>().is_err() {
        return Err(invalid(
            def,
            format!("'{}' must be an index, got '{}'", param.name, value),
        ));
    }
    Ok(())
}

fn spec(def: &ActionDef) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in def.params {
        properties.insert(
            param.name.to_string(),
            json!({
                "type": param.kind.json_type(),
                "description": param.description,
            }),
        );
        required.push(Value::String(param.name.to_string()));
    }
    json!({
        "name": def.name,
        "description": def.description,
        "parameters": {
            "type": "object",
            "properties": properties,
            "required": required,
        },
    })
}

fn lenient_schema(def: &ActionDef) -> Value {
    let mut properties = Map::new();
    for param in def.params {
        let property = match param.kind {
            ParamKind::Text => json!({ "type": "string" }),
            ParamKind::Index => json!({
                "anyOf": [
                    { "type": "integer", "minimum": 0 },
                    { "type": "string", "pattern": "^[0-9]+$" },
                ],
            }),
        };
        properties.insert(param.name.to_string(), property);
    }
    let required: Vec<&str> = def.params.iter().map(|param| param.name).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> Args {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn full() -> Catalog {
        Catalog::new(ActionSet {
            think: true,
            subtask_control: true,
        })
    }

    #[test]
    fn goto_renders_and_parses_back() {
        let catalog = Catalog::new(ActionSet::default());
        let goto_args = args(&[("recep", "cabinet"), ("recep_idx", "1")]);

        let rendered = catalog.render("goto", &goto_args).expect("render");
        assert_eq!(rendered, "go to cabinet 1");

        let parsed = catalog.parse("go to cabinet 1").expect("parse");
        assert_eq!(parsed, Action::new("goto", goto_args));
    }

    #[test]
    fn render_copies_values_containing_placeholders_verbatim() {
        let catalog = Catalog::new(ActionSet::default());
        let take_args = args(&[
            ("object", "{recep}"),
            ("object_idx", "1"),
            ("recep", "sink"),
            ("recep_idx", "2"),
        ]);
        assert_eq!(
            catalog.render("take", &take_args).expect("render"),
            "take {recep} 1 from sink 2"
        );

        let thought = args(&[("thought", "maybe {thought} goes {here}")]);
        assert_eq!(
            full().render("think", &thought).expect("render"),
            "think: maybe {thought} goes {here}"
        );
    }

    #[test]
    fn parse_ignores_trailing_tokens() {
        let catalog = Catalog::new(ActionSet::default());
        let parsed = catalog.parse("go to cabinet 1 now").expect("parse");
        assert_eq!(
            parsed,
            Action::new("goto", args(&[("recep", "cabinet"), ("recep_idx", "1")]))
        );
    }

    #[test]
    fn put_uses_declared_positions() {
        let catalog = Catalog::new(ActionSet::default());
        let parsed = catalog.parse("put mug 1 in/on coffeemachine 1").expect("parse");
        assert_eq!(parsed.name, "put");
        assert_eq!(
            parsed.args,
            args(&[
                ("object", "mug"),
                ("object_idx", "1"),
                ("recep", "coffeemachine"),
                ("recep_idx", "1"),
            ])
        );
    }

    #[test]
    fn think_consumes_rest_of_line() {
        let parsed = full()
            .parse("think: First I need to find a mug.")
            .expect("parse");
        assert_eq!(parsed.name, "think");
        assert_eq!(parsed.args["thought"], "First I need to find a mug.");
    }

    #[test]
    fn replace_subtask_skips_keyword_token() {
        let parsed = full()
            .parse("replace subtask: find a clean mug")
            .expect("parse");
        assert_eq!(parsed.name, REPLACE_SUBTASK);
        assert_eq!(parsed.args["subtask"], "find a clean mug");
        assert_eq!(
            full().render_action(&parsed).expect("render"),
            "replace subtask: find a clean mug"
        );
    }

    #[test]
    fn parse_rejects_unknown_leading_token() {
        let err = full().parse("dance wildly").unwrap_err();
        assert!(matches!(err, ContractError::NoMatchingAction { .. }));
    }

    #[test]
    fn think_is_not_parsed_without_extension() {
        let catalog = Catalog::new(ActionSet::default());
        let err = catalog.parse("think: hmm").unwrap_err();
        assert!(matches!(err, ContractError::NoMatchingAction { .. }));
    }

    #[test]
    fn parse_rejects_short_or_mistyped_strings() {
        let catalog = Catalog::new(ActionSet::default());
        assert!(matches!(
            catalog.parse("go to cabinet"),
            Err(ContractError::InvalidParameters { .. })
        ));
        assert!(matches!(
            catalog.parse("go to cabinet one"),
            Err(ContractError::InvalidParameters { .. })
        ));
    }

    #[test]
    fn render_requires_every_parameter_with_the_right_kind() {
        let catalog = Catalog::new(ActionSet::default());
        let missing = catalog.render("open", &args(&[("recep", "drawer")]));
        assert!(matches!(
            missing,
            Err(ContractError::InvalidParameters { .. })
        ));

        let wrong_kind = catalog.render("open", &args(&[("recep", "drawer"), ("recep_idx", "x")]));
        assert!(matches!(
            wrong_kind,
            Err(ContractError::InvalidParameters { .. })
        ));

        let unknown = catalog.render("fly", &Args::new());
        assert!(matches!(unknown, Err(ContractError::UnknownAction { .. })));
    }

    #[test]
    fn zero_parameter_actions_round_trip() {
        let catalog = Catalog::new(ActionSet::default());
        assert_eq!(catalog.render("look", &Args::new()).expect("render"), "look");
        assert_eq!(catalog.parse("inventory").expect("parse").name, "inventory");
    }

    #[test]
    fn specs_follow_selected_set_and_mark_index_integers() {
        let base = Catalog::new(ActionSet::default()).specs();
        assert!(base.iter().all(|spec| spec["name"] != "think"));

        let specs = full().specs();
        let goto = specs
            .iter()
            .find(|spec| spec["name"] == "goto")
            .expect("goto spec");
        assert_eq!(goto["parameters"]["type"], "object");
        assert_eq!(goto["parameters"]["properties"]["recep"]["type"], "string");
        assert_eq!(
            goto["parameters"]["properties"]["recep_idx"]["type"],
            "integer"
        );
        assert_eq!(goto["parameters"]["required"], json!(["recep", "recep_idx"]));
        assert!(specs.iter().any(|spec| spec["name"] == FINISH_SUBTASK));
    }

    #[test]
    fn structured_arguments_are_validated_and_normalized() {
        let catalog = Catalog::new(ActionSet::default());
        let normalized = catalog
            .arguments_from_json(
                "take",
                &json!({
                    "object": "mug",
                    "object_idx": 1,
                    "recep": "countertop",
                    "recep_idx": "2",
                    "extra": true,
                }),
            )
            .expect("valid arguments");
        assert_eq!(
            normalized,
            args(&[
                ("object", "mug"),
                ("object_idx", "1"),
                ("recep", "countertop"),
                ("recep_idx", "2"),
            ])
        );

        let err = catalog
            .arguments_from_json("take", &json!({ "object": "mug", "object_idx": -1 }))
            .unwrap_err();
        assert!(matches!(err, ContractError::InvalidParameters { .. }));
    }

    #[test]
    fn call_arguments_emit_indices_as_integers() {
        let catalog = Catalog::new(ActionSet::default());
        let value = catalog
            .call_arguments("goto", &args(&[("recep", "sinkbasin"), ("recep_idx", "1")]))
            .expect("arguments");
        assert_eq!(value, json!({ "recep": "sinkbasin", "recep_idx": 1 }));
    }

    #[test]
    fn introspective_actions_are_flagged() {
        let catalog = full();
        assert!(catalog.is_introspective("think"));
        assert!(catalog.is_introspective(FINISH_SUBTASK));
        assert!(!catalog.is_introspective("goto"));
        assert!(!catalog.is_introspective("missing"));
        assert_eq!(catalog.world_actions().count(), WORLD_ACTIONS.len());
    }
}
