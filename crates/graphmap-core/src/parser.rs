//! # Parser
//!
//! Recursive descent over the token stream produced by the lexer.
//!
//! ```text
//! script      = statement { statement } ;
//! statement   = ( select | create | update | delete ) ";" ;
//! select      = "select" chain ;
//! chain       = stage { ( "->" | "->>" | "<-" ) stage } ;
//! stage       = ( "(" predicates ")" | "[" predicates "]" ) [ "as" VALUE ] ;
//! predicates  = predicate { ";" predicate } ;
//! predicate   = "*" | pattern | NAME "=" ( pattern | tag_value ) ;
//! pattern     = VALUE { "|" VALUE } ;
//! create      = ( "upsert" | "add" [ "unique" ] ) ( "node" | "edge" ) property { "," property } ;
//! property    = NAME "=" tag_value | "entity" BLOCK | NAME ;
//! update      = "update" chain "set" set_property { "," set_property } ;
//! delete      = "delete" chain ;
//! ```
//!
//! The whole script is parsed before anything runs; any failure returns
//! `GraphError::Parse` (or `GraphError::InvalidEdge` for an edge whose
//! endpoints are equal) and no instruction is produced.

use crate::instruction::{
    CreateMode, Delete, Direction, EdgeCreate, EdgeSearch, Instruction, NodeCreate, NodeSearch,
    Pattern, Select, StageKind, Update, UpdateSet,
};
use crate::lexer::{Token, TokenKind, tokenize};
use crate::primitives::{MAX_COMMAND_LENGTH, MAX_SELECT_STAGES};
use crate::tags::{Tag, Tags};
use crate::types::GraphError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Parse a command script into instructions, in source order.
pub fn parse(input: &str) -> Result<Vec<Instruction>, GraphError> {
    Parser::new(input)?.parse_script()
}

/// One predicate inside a filter before it is assigned to a search field.
#[derive(Debug)]
enum Predicate {
    /// `*`
    All,
    /// A value with no field name.
    Bare(Pattern),
    /// `key=`, `fromKey=`, `toKey=`, `edgeType=`
    Field(Field, Pattern),
    /// `tags=...` or any other `name=value`
    Tags(Tags),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Key,
    FromKey,
    ToKey,
    EdgeType,
}

impl Field {
    fn name(self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::FromKey => "fromKey",
            Self::ToKey => "toKey",
            Self::EdgeType => "edgeType",
        }
    }
}

/// Classification of a `name=` property or predicate name.
enum Name {
    Field(Field),
    Tags,
    Entity,
    Other(String),
}

fn classify(name: &str) -> Name {
    match name.to_lowercase().as_str() {
        "key" => Name::Field(Field::Key),
        "fromkey" => Name::Field(Field::FromKey),
        "tokey" => Name::Field(Field::ToKey),
        "edgetype" => Name::Field(Field::EdgeType),
        "tags" => Name::Tags,
        "entity" => Name::Entity,
        _ => Name::Other(name.to_string()),
    }
}

/// Decode `'<base64>'` (quotes optional) from a block literal.
fn decode_entity(block: &str) -> Result<Vec<u8>, String> {
    let text = block.trim();
    let inner = match (text.chars().next(), text.chars().last()) {
        (Some(open @ ('\'' | '"')), Some(close)) if open == close && text.len() >= 2 => {
            &text[1..text.len() - 1]
        }
        _ => text,
    };
    BASE64
        .decode(inner.trim())
        .map_err(|e| format!("invalid base64 entity: {}", e))
}

fn set_once<T>(slot: &mut Option<T>, value: T, name: &str, offset: usize) -> Result<(), GraphError> {
    if slot.is_some() {
        return Err(GraphError::parse(offset, format!("duplicate '{}'", name)));
    }
    *slot = Some(value);
    Ok(())
}

/// Tag keys and values must survive rendering as one `tags='...'` list.
fn check_tag_text(text: &str, is_key: bool, offset: usize) -> Result<(), GraphError> {
    let (reserved, what): (&[char], &str) = if is_key {
        (&[',', ';', '='], "key")
    } else {
        (&[',', ';'], "value")
    };
    match text.chars().find(|c| reserved.contains(c)) {
        Some(c) => Err(GraphError::parse(
            offset,
            format!("'{}' is not allowed in a tag {}", c, what),
        )),
        None => Ok(()),
    }
}

/// A tag list renders as one quoted literal, which cannot hold both quotes.
fn check_quotable(tags: &Tags, offset: usize) -> Result<(), GraphError> {
    let text = tags.to_string();
    if text.contains('\'') && text.contains('"') {
        return Err(GraphError::parse(
            offset,
            "tags cannot contain both single and double quotes",
        ));
    }
    Ok(())
}

fn merge_tags(into: &mut Tags, from: Tags) {
    for tag in from.iter() {
        into.set(tag.clone());
    }
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, GraphError> {
        if input.len() > MAX_COMMAND_LENGTH {
            return Err(GraphError::parse(
                0,
                format!(
                    "command length {} exceeds maximum {} bytes",
                    input.len(),
                    MAX_COMMAND_LENGTH
                ),
            ));
        }
        Ok(Self {
            input,
            tokens: tokenize(input),
            pos: 0,
        })
    }

    // =========================================================================
    // TOKEN CURSOR
    // =========================================================================

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.offset)
            .unwrap_or(self.input.len())
    }

    fn unexpected(&self, what: &str) -> GraphError {
        let found = match self.peek() {
            Some(TokenKind::Unterminated(c)) => {
                return GraphError::parse(
                    self.offset(),
                    format!("unterminated literal starting with {}", c),
                );
            }
            Some(kind) => kind.to_string(),
            None => "end of input".to_string(),
        };
        GraphError::parse(self.offset(), format!("expected {}, found {}", what, found))
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), GraphError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(TokenKind::Value(v)) if v.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// A bare or quoted value.
    fn literal(&mut self, what: &str) -> Result<String, GraphError> {
        match self.tokens.get(self.pos).map(|t| &t.kind) {
            Some(TokenKind::Value(v) | TokenKind::Quoted(v)) => {
                let value = v.clone();
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    // =========================================================================
    // STATEMENTS
    // =========================================================================

    fn parse_script(mut self) -> Result<Vec<Instruction>, GraphError> {
        if self.tokens.is_empty() {
            return Err(GraphError::parse(0, "empty command"));
        }
        let mut instructions = Vec::new();
        while self.peek().is_some() {
            instructions.push(self.parse_statement()?);
        }
        Ok(instructions)
    }

    fn parse_statement(&mut self) -> Result<Instruction, GraphError> {
        let offset = self.offset();
        let keyword = match self.peek() {
            Some(TokenKind::Value(v)) => v.to_lowercase(),
            _ => return Err(self.unexpected("statement keyword")),
        };
        self.pos += 1;

        let instruction = match keyword.as_str() {
            "select" => Instruction::Select(self.parse_chain()?),
            "upsert" => self.parse_create(CreateMode::Upsert)?,
            "add" => {
                let mode = if self.eat_keyword("unique") {
                    CreateMode::Unique
                } else {
                    CreateMode::Add
                };
                self.parse_create(mode)?
            }
            "update" => self.parse_update()?,
            "delete" => Instruction::Delete(Delete {
                select: self.parse_chain()?,
            }),
            other => {
                return Err(GraphError::parse(
                    offset,
                    format!("unknown keyword '{}'", other),
                ));
            }
        };

        self.expect(&TokenKind::Semicolon, "';' terminating the statement")?;
        Ok(instruction)
    }

    fn parse_create(&mut self, mode: CreateMode) -> Result<Instruction, GraphError> {
        if self.eat_keyword("node") {
            self.parse_node_create(mode).map(Instruction::NodeCreate)
        } else if self.eat_keyword("edge") {
            self.parse_edge_create(mode).map(Instruction::EdgeCreate)
        } else {
            Err(self.unexpected("'node' or 'edge'"))
        }
    }

    /// Parse `property { "," property }` calling `apply` for each
    /// `(name, offset)`. `apply` consumes the value tokens itself.
    fn parse_properties<F>(&mut self, mut apply: F) -> Result<(), GraphError>
    where
        F: FnMut(&mut Self, String, usize) -> Result<(), GraphError>,
    {
        loop {
            let offset = self.offset();
            let name = self.literal("property name")?;
            apply(self, name, offset)?;
            if !self.eat(&TokenKind::Comma) {
                return Ok(());
            }
        }
    }

    /// Value of a free-form `name=value` tag. `a=b=c` keeps `b=c`.
    fn parse_tag_value(&mut self) -> Result<String, GraphError> {
        let mut value = self.literal("tag value")?;
        while self.eat(&TokenKind::Equal) {
            value.push('=');
            value.push_str(&self.literal("tag value")?);
        }
        Ok(value)
    }

    /// After `tags=`: a quoted list, or a single bare `k` / `k=v`.
    fn parse_tag_list(&mut self) -> Result<Tags, GraphError> {
        let offset = self.offset();
        let tags = Tags::parse(&self.parse_tag_value()?);
        if tags.is_empty() {
            return Err(GraphError::parse(offset, "empty tag list"));
        }
        check_quotable(&tags, offset)?;
        Ok(tags)
    }

    /// A free-form property: `name=value` or a key-only `name`.
    fn parse_free_tag(&mut self, name: String, offset: usize) -> Result<Tag, GraphError> {
        let value = if self.eat(&TokenKind::Equal) {
            Some(self.parse_tag_value()?)
        } else {
            None
        };
        check_tag_text(&name, true, offset)?;
        if let Some(value) = &value {
            check_tag_text(value, false, offset)?;
        }
        Tag::parse(&name)
            .map(|tag| Tag::new(tag.key(), value))
            .ok_or_else(|| GraphError::parse(offset, "empty tag name"))
    }

    fn parse_entity(&mut self) -> Result<Vec<u8>, GraphError> {
        self.eat(&TokenKind::Equal);
        let offset = self.offset();
        match self.peek() {
            Some(TokenKind::Block(block)) => {
                let decoded = decode_entity(block).map_err(|e| GraphError::parse(offset, e))?;
                self.pos += 1;
                Ok(decoded)
            }
            _ => Err(self.unexpected("entity block '{ ... }'")),
        }
    }

    fn parse_node_create(&mut self, mode: CreateMode) -> Result<NodeCreate, GraphError> {
        let start = self.offset();
        let mut key = None;
        let mut tags = Tags::new();
        let mut entity = None;

        self.parse_properties(|p, name, offset| match classify(&name) {
            Name::Field(Field::Key) => {
                p.expect(&TokenKind::Equal, "'=' after key")?;
                let value = p.literal("node key")?;
                set_once(&mut key, value, "key", offset)
            }
            Name::Field(field) => Err(GraphError::parse(
                offset,
                format!("'{}' is not valid for a node", field.name()),
            )),
            Name::Tags => {
                p.expect(&TokenKind::Equal, "'=' after tags")?;
                merge_tags(&mut tags, p.parse_tag_list()?);
                Ok(())
            }
            Name::Entity => {
                let value = p.parse_entity()?;
                set_once(&mut entity, value, "entity", offset)
            }
            Name::Other(name) => {
                tags.set(p.parse_free_tag(name, offset)?);
                Ok(())
            }
        })?;

        let key = key.ok_or_else(|| GraphError::parse(start, "node statement requires key="))?;
        check_quotable(&tags, start)?;
        Ok(NodeCreate {
            key,
            tags,
            entity,
            mode,
        })
    }

    fn parse_edge_create(&mut self, mode: CreateMode) -> Result<EdgeCreate, GraphError> {
        let start = self.offset();
        let mut from_key = None;
        let mut to_key = None;
        let mut edge_type = None;
        let mut tags = Tags::new();

        self.parse_properties(|p, name, offset| match classify(&name) {
            Name::Field(field @ (Field::FromKey | Field::ToKey | Field::EdgeType)) => {
                p.expect(&TokenKind::Equal, "'='")?;
                let value = p.literal(field.name())?;
                let slot = match field {
                    Field::FromKey => &mut from_key,
                    Field::ToKey => &mut to_key,
                    _ => &mut edge_type,
                };
                set_once(slot, value, field.name(), offset)
            }
            Name::Field(Field::Key) | Name::Entity => Err(GraphError::parse(
                offset,
                format!("'{}' is not valid for an edge", name),
            )),
            Name::Tags => {
                p.expect(&TokenKind::Equal, "'=' after tags")?;
                merge_tags(&mut tags, p.parse_tag_list()?);
                Ok(())
            }
            Name::Other(name) => {
                tags.set(p.parse_free_tag(name, offset)?);
                Ok(())
            }
        })?;

        let (Some(from_key), Some(to_key)) = (from_key, to_key) else {
            return Err(GraphError::parse(
                start,
                "edge statement requires fromKey= and toKey=",
            ));
        };
        check_quotable(&tags, start)?;
        EdgeCreate::new(from_key, to_key, edge_type, tags, mode)
    }

    fn parse_update(&mut self) -> Result<Instruction, GraphError> {
        let select = self.parse_chain()?;
        if !self.eat_keyword("set") {
            return Err(self.unexpected("'set'"));
        }
        let kind = select.final_kind();
        let mut set = UpdateSet::default();

        self.parse_properties(|p, name, offset| match classify(&name) {
            Name::Tags => {
                p.expect(&TokenKind::Equal, "'=' after tags")?;
                let tags = p.parse_tag_list()?;
                set_once(&mut set.tags, tags, "tags", offset)
            }
            Name::Field(Field::EdgeType) if kind == Some(StageKind::Edges) => {
                p.expect(&TokenKind::Equal, "'=' after edgeType")?;
                let value = p.literal("edge type")?;
                set_once(&mut set.edge_type, value, "edgeType", offset)
            }
            Name::Entity if kind == Some(StageKind::Nodes) => {
                let value = p.parse_entity()?;
                set_once(&mut set.entity, value, "entity", offset)
            }
            _ => Err(GraphError::parse(
                offset,
                format!("'{}' cannot be set on this selection", name),
            )),
        })?;

        Ok(Instruction::Update(Update { select, set }))
    }

    // =========================================================================
    // SEARCH CHAINS
    // =========================================================================

    fn parse_chain(&mut self) -> Result<Select, GraphError> {
        let start = self.offset();
        let mut stages = vec![self.parse_stage(Direction::Any)?];
        loop {
            let direction = if self.eat(&TokenKind::ArrowRight) {
                Direction::Any
            } else if self.eat(&TokenKind::ArrowForward) {
                Direction::Outgoing
            } else if self.eat(&TokenKind::ArrowLeft) {
                Direction::Incoming
            } else {
                break;
            };
            stages.push(self.parse_stage(direction)?);
        }
        if stages.len() > MAX_SELECT_STAGES {
            return Err(GraphError::parse(
                start,
                format!("select has more than {} stages", MAX_SELECT_STAGES),
            ));
        }
        Ok(Select::new(stages))
    }

    fn parse_stage(&mut self, direction: Direction) -> Result<Instruction, GraphError> {
        let mut stage = if self.eat(&TokenKind::OpenParen) {
            let predicates = self.parse_predicates(&TokenKind::CloseParen, "')'")?;
            Instruction::NodeSearch(Self::node_search(predicates, direction)?)
        } else if self.eat(&TokenKind::OpenBracket) {
            let predicates = self.parse_predicates(&TokenKind::CloseBracket, "']'")?;
            Instruction::EdgeSearch(Self::edge_search(predicates, direction)?)
        } else {
            return Err(self.unexpected("'(' or '['"));
        };

        if self.eat_keyword("as") {
            let alias = self.literal("alias name")?;
            match &mut stage {
                Instruction::NodeSearch(search) => search.alias = Some(alias),
                Instruction::EdgeSearch(search) => search.alias = Some(alias),
                _ => {}
            }
        }
        Ok(stage)
    }

    fn parse_predicates(
        &mut self,
        close: &TokenKind,
        close_text: &str,
    ) -> Result<Vec<(Predicate, usize)>, GraphError> {
        if self.peek() == Some(close) {
            return Err(GraphError::parse(self.offset(), "empty filter"));
        }
        let mut predicates = Vec::new();
        loop {
            let offset = self.offset();
            predicates.push((self.parse_predicate()?, offset));
            if self.eat(close) {
                return Ok(predicates);
            }
            if !self.eat(&TokenKind::Semicolon) {
                return Err(self.unexpected(&format!("';' or {}", close_text)));
            }
        }
    }

    fn parse_pattern_from(&mut self, first: String) -> Result<Pattern, GraphError> {
        let mut alternatives = vec![first];
        while self.eat(&TokenKind::Pipe) {
            alternatives.push(self.literal("pattern alternative")?);
        }
        Ok(Pattern::new(alternatives))
    }

    fn parse_predicate(&mut self) -> Result<Predicate, GraphError> {
        let is_bare_star = matches!(self.peek(), Some(TokenKind::Value(v)) if v == "*");
        let first = self.literal("predicate")?;
        if !self.eat(&TokenKind::Equal) {
            if is_bare_star {
                return Ok(Predicate::All);
            }
            return self.parse_pattern_from(first).map(Predicate::Bare);
        }

        match classify(&first) {
            Name::Field(field) => {
                let value = self.literal(field.name())?;
                Ok(Predicate::Field(field, self.parse_pattern_from(value)?))
            }
            Name::Tags => self.parse_tag_list().map(Predicate::Tags),
            Name::Entity | Name::Other(_) => {
                let offset = self.offset();
                let value = self.parse_tag_value()?;
                check_tag_text(&first, true, offset)?;
                check_tag_text(&value, false, offset)?;
                let tag = Tag::new(first, Some(value));
                Ok(Predicate::Tags(std::iter::once(tag).collect()))
            }
        }
    }

    fn node_search(
        predicates: Vec<(Predicate, usize)>,
        direction: Direction,
    ) -> Result<NodeSearch, GraphError> {
        let mut search = NodeSearch {
            direction,
            ..NodeSearch::default()
        };
        for (predicate, offset) in predicates {
            match predicate {
                Predicate::All => {}
                Predicate::Bare(pattern) | Predicate::Field(Field::Key, pattern) => {
                    set_once(&mut search.key, pattern, "key", offset)?;
                }
                Predicate::Field(field, _) => {
                    return Err(GraphError::parse(
                        offset,
                        format!("'{}' is not valid in a node filter", field.name()),
                    ));
                }
                Predicate::Tags(tags) => {
                    merge_tags(&mut search.tags, tags);
                    check_quotable(&search.tags, offset)?;
                }
            }
        }
        Ok(search)
    }

    fn edge_search(
        predicates: Vec<(Predicate, usize)>,
        direction: Direction,
    ) -> Result<EdgeSearch, GraphError> {
        let mut search = EdgeSearch {
            direction,
            ..EdgeSearch::default()
        };
        for (predicate, offset) in predicates {
            match predicate {
                Predicate::All => {}
                Predicate::Bare(pattern) | Predicate::Field(Field::EdgeType, pattern) => {
                    set_once(&mut search.edge_type, pattern, "edgeType", offset)?;
                }
                Predicate::Field(Field::Key, pattern) => {
                    set_once(&mut search.key, pattern, "key", offset)?;
                }
                Predicate::Field(Field::FromKey, pattern) => {
                    set_once(&mut search.from_key, pattern, "fromKey", offset)?;
                }
                Predicate::Field(Field::ToKey, pattern) => {
                    set_once(&mut search.to_key, pattern, "toKey", offset)?;
                }
                Predicate::Tags(tags) => {
                    merge_tags(&mut search.tags, tags);
                    check_quotable(&search.tags, offset)?;
                }
            }
        }
        Ok(search)
    }
}

// =============================================================================
// TESTS
// =============================================================================
