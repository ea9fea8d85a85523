//! The rule-spec compiler: a single left-to-right pass over argv.
//!
//! The walk recognizes the command letter and parses core filter
//! options. Anything else is an extension option: its name resolves
//! against the selected target's and matches' own option tables first
//! (several extensions may use the same long name), and the resulting
//! code is routed to the extension whose merged-offset range owns it.
//! When nothing in scope claims the option, a pending protocol may
//! demand-load its match and the name is resolved again.

use std::net::Ipv6Addr;

use nf6_abi::{Blob, CHAIN_MAXNAMELEN, Entry, F_PROTO, INV_DSTIP, INV_SRCIP, NFC_DST, NFC_IF_IN,
    NFC_IF_OUT, NFC_PROTO, NFC_SRC, Rule, align_up};
use nf6_ext::{ArgKind, ExtensionLoader, LoadPolicy, LongOpt, OPTION_OFFSET, OptSpec, OptionOwner,
    Registry, extensions::register_builtins, string_to_number};

use crate::address::{Resolver, parse_hostnetworkmask};
use crate::command::{
    CMD_APPEND, CMD_CHECK, CMD_DELETE, CMD_DELETE_CHAIN, CMD_DELETE_NUM, CMD_FLUSH, CMD_INSERT,
    CMD_LIST, CMD_NEW_CHAIN, CMD_NONE, CMD_RENAME_CHAIN, CMD_REPLACE, CMD_RULE, CMD_SET_POLICY,
    CMD_ZERO, OPT_DESTINATION, OPT_EXPANDED, OPT_JUMP, OPT_LINENUMBERS, OPT_NUMERIC, OPT_PROTOCOL,
    OPT_SOURCE, OPT_VERBOSE, OPT_VIANAMEIN, OPT_VIANAMEOUT, add_command, cmd_char, check_options,
    set_option,
};
use crate::error::{Result, param};
use crate::help::build_help;
use crate::iface::parse_interface;
use crate::proto::{ProtocolDb, parse_protocol, proto_to_name};
use crate::{PROGRAM_NAME, VERSION};

/// Core long options; the codes are the short letters.
const CORE_OPTS: &[OptSpec] = &[
    OptSpec::new("append", ArgKind::Required, 'A' as u32),
    OptSpec::new("delete", ArgKind::Required, 'D' as u32),
    OptSpec::new("insert", ArgKind::Required, 'I' as u32),
    OptSpec::new("replace", ArgKind::Required, 'R' as u32),
    OptSpec::new("list", ArgKind::Optional, 'L' as u32),
    OptSpec::new("flush", ArgKind::Optional, 'F' as u32),
    OptSpec::new("zero", ArgKind::Optional, 'Z' as u32),
    OptSpec::new("check", ArgKind::Required, 'C' as u32),
    OptSpec::new("new-chain", ArgKind::Required, 'N' as u32),
    OptSpec::new("delete-chain", ArgKind::Optional, 'X' as u32),
    OptSpec::new("rename-chain", ArgKind::Required, 'E' as u32),
    OptSpec::new("policy", ArgKind::Required, 'P' as u32),
    OptSpec::new("source", ArgKind::Required, 's' as u32),
    OptSpec::new("destination", ArgKind::Required, 'd' as u32),
    OptSpec::new("src", ArgKind::Required, 's' as u32),
    OptSpec::new("dst", ArgKind::Required, 'd' as u32),
    OptSpec::new("protocol", ArgKind::Required, 'p' as u32),
    OptSpec::new("in-interface", ArgKind::Required, 'i' as u32),
    OptSpec::new("jump", ArgKind::Required, 'j' as u32),
    OptSpec::new("table", ArgKind::Required, 't' as u32),
    OptSpec::new("match", ArgKind::Required, 'm' as u32),
    OptSpec::new("numeric", ArgKind::None, 'n' as u32),
    OptSpec::new("out-interface", ArgKind::Required, 'o' as u32),
    OptSpec::new("verbose", ArgKind::None, 'v' as u32),
    OptSpec::new("exact", ArgKind::None, 'x' as u32),
    OptSpec::new("version", ArgKind::None, 'V' as u32),
    OptSpec::new("help", ArgKind::Optional, 'h' as u32),
    OptSpec::new("line-numbers", ArgKind::None, '0' as u32),
];

const SHORT_OPTS: &[(char, ArgKind)] = &[
    ('A', ArgKind::Required),
    ('C', ArgKind::Required),
    ('D', ArgKind::Required),
    ('R', ArgKind::Required),
    ('I', ArgKind::Required),
    ('L', ArgKind::Optional),
    ('F', ArgKind::Optional),
    ('Z', ArgKind::Optional),
    ('N', ArgKind::Required),
    ('X', ArgKind::Optional),
    ('E', ArgKind::Required),
    ('P', ArgKind::Required),
    ('V', ArgKind::None),
    ('h', ArgKind::Optional),
    ('o', ArgKind::Required),
    ('p', ArgKind::Required),
    ('s', ArgKind::Required),
    ('d', ArgKind::Required),
    ('j', ArgKind::Required),
    ('i', ArgKind::Required),
    ('v', ArgKind::None),
    ('n', ArgKind::None),
    ('t', ArgKind::Required),
    ('m', ArgKind::Required),
    ('x', ArgKind::None),
];

fn short_arg_kind(c: char) -> Option<ArgKind> {
    SHORT_OPTS.iter().find(|&&(s, _)| s == c).map(|&(_, k)| k)
}

/// Everything an invocation needs, threaded through the compiler and
/// dispatcher instead of process-wide globals.
pub struct Context {
    pub registry: Registry,
    pub resolver: Box<dyn Resolver>,
    pub protos: Box<dyn ProtocolDb>,
}

impl Context {
    /// Build a context with the built-in extensions registered.
    pub fn new(
        loader: Box<dyn ExtensionLoader>,
        resolver: Box<dyn Resolver>,
        protos: Box<dyn ProtocolDb>,
    ) -> Result<Self> {
        let mut registry = Registry::new(CORE_OPTS, loader);
        register_builtins(&mut registry)?;
        Ok(Self {
            registry,
            resolver,
            protos,
        })
    }
}

/// A match blob under construction.
#[derive(Debug)]
pub(crate) struct PendingMatch {
    pub idx: usize,
    pub flags: u32,
    pub data: Vec<u8>,
}

/// The target blob under construction. `idx` is `None` for a jump to an
/// unknown extension, which assembles as a bare header.
#[derive(Debug)]
pub(crate) struct PendingTarget {
    pub idx: Option<usize>,
    pub label: String,
    pub flags: u32,
    pub data: Vec<u8>,
}

/// A fully parsed and validated command line.
#[derive(Debug)]
pub struct Invocation {
    pub(crate) command: u16,
    pub(crate) options: u16,
    pub(crate) chain: Option<String>,
    /// 1-based rule number; 0 when absent.
    pub(crate) rulenum: usize,
    pub(crate) newname: Option<String>,
    pub(crate) policy_name: Option<String>,
    pub(crate) table: String,
    pub(crate) jumpto: String,
    pub(crate) entry: Entry,
    pub(crate) matches: Vec<PendingMatch>,
    pub(crate) target: Option<PendingTarget>,
    pub(crate) saddrs: Vec<Ipv6Addr>,
    pub(crate) daddrs: Vec<Ipv6Addr>,
}

impl Invocation {
    /// Assemble the binary rule: entry, match blobs in insertion order,
    /// then the target blob.
    pub(crate) fn generate_entry(&self, registry: &Registry) -> Result<Rule> {
        let mut blobs = Vec::with_capacity(self.matches.len());
        for m in &self.matches {
            let ext = registry.match_at(m.idx);
            let mut blob = Blob::new(ext.name(), m.data.len(), ext.revision())
                .map_err(|e| param(e.to_string()))?;
            blob.data.copy_from_slice(&m.data);
            blobs.push(blob);
        }
        let target_blob = match &self.target {
            Some(t) => {
                let revision = t.idx.map_or(0, |i| registry.target_at(i).revision());
                let mut blob = Blob::new(&t.label, t.data.len(), revision)
                    .map_err(|e| param(e.to_string()))?;
                blob.data.copy_from_slice(&t.data);
                blob
            }
            // No extension at all: a bare header carrying the jump name.
            None => Blob::new(&self.jumpto, 0, 0).map_err(|e| param(e.to_string()))?,
        };
        Ok(Rule::assemble(&self.entry, &blobs, &target_blob))
    }
}

/// Result of compiling argv: an executable invocation, or output that
/// short-circuits the run (`-h`, `-V`).
pub enum Compiled {
    Run(Box<Invocation>),
    Message(String),
}

/// Compile argv against the context's merged grammar.
pub fn compile(args: &[String], ctx: &mut Context) -> Result<Compiled> {
    Compiler::new(args, ctx).run()
}

struct Compiler<'a> {
    ctx: &'a mut Context,
    args: &'a [String],
    pos: usize,
    invert: bool,
    command: u16,
    options: u16,
    entry: Entry,
    chain: Option<String>,
    rulenum: usize,
    newname: Option<String>,
    policy_name: Option<String>,
    table: String,
    verbose: usize,
    protocol: Option<String>,
    src_spec: Option<String>,
    dst_spec: Option<String>,
    jumpto: String,
    target: Option<PendingTarget>,
    matches: Vec<PendingMatch>,
}

impl<'a> Compiler<'a> {
    fn new(args: &'a [String], ctx: &'a mut Context) -> Self {
        Self {
            ctx,
            args,
            pos: 0,
            invert: false,
            command: CMD_NONE,
            options: 0,
            entry: Entry::default(),
            chain: None,
            rulenum: 0,
            newname: None,
            policy_name: None,
            table: "filter".to_string(),
            verbose: 0,
            protocol: None,
            src_spec: None,
            dst_spec: None,
            jumpto: String::new(),
            target: None,
            matches: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Compiled> {
        while let Some(token) = self.next_arg() {
            if token == "!" {
                if self.invert {
                    return Err(param("multiple consecutive ! not allowed"));
                }
                self.invert = true;
                continue;
            }
            let outcome = if let Some(rest) = token.strip_prefix("--") {
                if rest.is_empty() {
                    // "--" stops option recognition; anything left is
                    // caught as unknown trailing arguments.
                    break;
                }
                self.handle_long(&token, rest.to_string())?
            } else if token.len() > 1 && token.starts_with('-') {
                self.handle_cluster(&token)?
            } else {
                return Err(param(format!("Bad argument `{token}'")));
            };
            if let Some(message) = outcome {
                return Ok(Compiled::Message(message));
            }
        }
        self.finalize().map(|inv| Compiled::Run(Box::new(inv)))
    }

    // ========================================================================
    // Token plumbing
    // ========================================================================

    fn next_arg(&mut self) -> Option<String> {
        let arg = self.args.get(self.pos).cloned();
        if arg.is_some() {
            self.pos += 1;
        }
        arg
    }

    /// Consume the next argument when it is a plain word, the way the
    /// commands with trailing chain names and rule numbers do.
    fn take_trailing_word(&mut self) -> Option<String> {
        let next = self.args.get(self.pos)?;
        if next.starts_with('-') || next == "!" {
            return None;
        }
        self.pos += 1;
        Some(next.clone())
    }

    fn required_value(&mut self, token: &str, inline: Option<String>) -> Result<String> {
        inline
            .or_else(|| self.next_arg())
            .ok_or_else(|| param(format!("option `{token}' requires an argument")))
    }

    /// Required value that may carry a `!` in value position, as in
    /// `-s ! ::1`.
    fn inverse_value(&mut self, token: &str, inline: Option<String>) -> Result<String> {
        let value = self.required_value(token, inline)?;
        if value == "!" {
            if self.invert {
                return Err(param("Multiple `!' flags not allowed"));
            }
            self.invert = true;
            return self.required_value(token, None);
        }
        Ok(value)
    }

    // ========================================================================
    // Option recognition
    // ========================================================================

    fn handle_long(&mut self, token: &str, rest: String) -> Result<Option<String>> {
        let (name, inline) = match rest.split_once('=') {
            Some((n, v)) => (n.to_string(), Some(v.to_string())),
            None => (rest, None),
        };
        // Core option names are unique and sit below the first
        // extension offset; everything else belongs to an extension.
        if let Some(opt) = self.ctx.registry.find_long(&name).copied() {
            if opt.code < OPTION_OFFSET {
                return self.handle_code(opt.code, inline, token);
            }
        }
        self.handle_extension_option(token, &name, inline)
    }

    fn handle_cluster(&mut self, token: &str) -> Result<Option<String>> {
        let chars: Vec<char> = token[1..].chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let Some(kind) = short_arg_kind(c) else {
                return self.handle_extension_option(token, &c.to_string(), None);
            };
            if kind == ArgKind::None {
                if let Some(msg) = self.handle_code(c as u32, None, token)? {
                    return Ok(Some(msg));
                }
                i += 1;
                continue;
            }
            // A value-taking option consumes the rest of the cluster.
            let rest: String = chars[i + 1..].iter().collect();
            let inline = if rest.is_empty() { None } else { Some(rest) };
            return self.handle_code(c as u32, inline, token);
        }
        Ok(None)
    }

    fn handle_code(
        &mut self,
        code: u32,
        inline: Option<String>,
        token: &str,
    ) -> Result<Option<String>> {
        let outcome = self.handle_code_inner(code, inline, token)?;
        self.invert = false;
        Ok(outcome)
    }

    #[allow(clippy::too_many_lines)]
    fn handle_code_inner(
        &mut self,
        code: u32,
        inline: Option<String>,
        token: &str,
    ) -> Result<Option<String>> {
        // Callers only route core codes here; extension codes go
        // through handle_extension_option with their name.
        let Some(c) = char::from_u32(code).filter(|_| code < OPTION_OFFSET) else {
            return Err(param(format!("Unknown arg `{token}'")));
        };
        match c {
            // ----------------------------------------------------------------
            // Command selection
            // ----------------------------------------------------------------
            'A' => {
                add_command(&mut self.command, CMD_APPEND, CMD_NONE, self.invert)?;
                self.chain = Some(self.required_value(token, inline)?);
            }
            'D' => {
                add_command(&mut self.command, CMD_DELETE, CMD_NONE, self.invert)?;
                self.chain = Some(self.required_value(token, inline)?);
                if let Some(word) = self.take_trailing_word() {
                    self.rulenum = parse_rulenumber(&word)?;
                    self.command = (self.command & !CMD_DELETE) | CMD_DELETE_NUM;
                }
            }
            'C' => {
                add_command(&mut self.command, CMD_CHECK, CMD_NONE, self.invert)?;
                self.chain = Some(self.required_value(token, inline)?);
            }
            'R' => {
                add_command(&mut self.command, CMD_REPLACE, CMD_NONE, self.invert)?;
                self.chain = Some(self.required_value(token, inline)?);
                match self.take_trailing_word() {
                    Some(word) => self.rulenum = parse_rulenumber(&word)?,
                    None => {
                        return Err(param(format!(
                            "-{} requires a rule number",
                            cmd_char(CMD_REPLACE)
                        )));
                    }
                }
            }
            'I' => {
                add_command(&mut self.command, CMD_INSERT, CMD_NONE, self.invert)?;
                self.chain = Some(self.required_value(token, inline)?);
                self.rulenum = match self.take_trailing_word() {
                    Some(word) => parse_rulenumber(&word)?,
                    None => 1,
                };
            }
            'L' => {
                add_command(&mut self.command, CMD_LIST, CMD_ZERO, self.invert)?;
                if let Some(chain) = inline.or_else(|| self.take_trailing_word()) {
                    self.chain = Some(chain);
                }
            }
            'F' => {
                add_command(&mut self.command, CMD_FLUSH, CMD_NONE, self.invert)?;
                if let Some(chain) = inline.or_else(|| self.take_trailing_word()) {
                    self.chain = Some(chain);
                }
            }
            'Z' => {
                add_command(&mut self.command, CMD_ZERO, CMD_LIST, self.invert)?;
                if let Some(chain) = inline.or_else(|| self.take_trailing_word()) {
                    self.chain = Some(chain);
                }
            }
            'N' => {
                add_command(&mut self.command, CMD_NEW_CHAIN, CMD_NONE, self.invert)?;
                self.chain = Some(self.required_value(token, inline)?);
            }
            'X' => {
                add_command(&mut self.command, CMD_DELETE_CHAIN, CMD_NONE, self.invert)?;
                if let Some(chain) = inline.or_else(|| self.take_trailing_word()) {
                    self.chain = Some(chain);
                }
            }
            'E' => {
                add_command(&mut self.command, CMD_RENAME_CHAIN, CMD_NONE, self.invert)?;
                self.chain = Some(self.required_value(token, inline)?);
                match self.take_trailing_word() {
                    Some(word) => self.newname = Some(word),
                    None => {
                        return Err(param(format!(
                            "-{} requires an old and a new chain name",
                            cmd_char(CMD_RENAME_CHAIN)
                        )));
                    }
                }
            }
            'P' => {
                add_command(&mut self.command, CMD_SET_POLICY, CMD_NONE, self.invert)?;
                self.chain = Some(self.required_value(token, inline)?);
                match self.take_trailing_word() {
                    Some(word) => self.policy_name = Some(word),
                    None => {
                        return Err(param(format!(
                            "-{} requires a chain and a policy",
                            cmd_char(CMD_SET_POLICY)
                        )));
                    }
                }
            }
            'h' => {
                // `-p icmp -h` should show the protocol match's help too.
                if self.matches.is_empty() {
                    if let Some(proto) = self.protocol.clone() {
                        let numeric = self.options & OPT_NUMERIC != 0;
                        let _ = self.find_proto(&proto, LoadPolicy::TryLoad, numeric);
                    }
                }
                return Ok(Some(build_help(self.ctx)));
            }
            'V' => {
                let msg = if self.invert {
                    format!("Not {VERSION} ;-)")
                } else {
                    format!("{PROGRAM_NAME} v{VERSION}")
                };
                return Ok(Some(msg));
            }

            // ----------------------------------------------------------------
            // Filter options
            // ----------------------------------------------------------------
            'p' => {
                let value = self.inverse_value(token, inline)?.to_lowercase();
                set_option(
                    &mut self.options,
                    OPT_PROTOCOL,
                    &mut self.entry.invflags,
                    self.invert,
                )?;
                self.entry.proto = u16::from(parse_protocol(&value, &*self.ctx.protos)?);
                self.entry.flags |= F_PROTO;
                if self.entry.proto == 0 && self.entry.invflags & nf6_abi::INV_PROTO != 0 {
                    return Err(param("rule would never match protocol"));
                }
                self.entry.nfcache |= NFC_PROTO;
                self.protocol = Some(value);
            }
            's' => {
                let value = self.inverse_value(token, inline)?;
                set_option(
                    &mut self.options,
                    OPT_SOURCE,
                    &mut self.entry.invflags,
                    self.invert,
                )?;
                self.entry.nfcache |= NFC_SRC;
                self.src_spec = Some(value);
            }
            'd' => {
                let value = self.inverse_value(token, inline)?;
                set_option(
                    &mut self.options,
                    OPT_DESTINATION,
                    &mut self.entry.invflags,
                    self.invert,
                )?;
                self.entry.nfcache |= NFC_DST;
                self.dst_spec = Some(value);
            }
            'j' => {
                set_option(
                    &mut self.options,
                    OPT_JUMP,
                    &mut self.entry.invflags,
                    self.invert,
                )?;
                let value = self.required_value(token, inline)?;
                self.jumpto = parse_target(&value)?;
                if let Some(idx) = self
                    .ctx
                    .registry
                    .find_target(&self.jumpto, LoadPolicy::TryLoad)?
                {
                    self.push_target(idx, &self.jumpto.clone());
                }
            }
            'i' => {
                let value = self.inverse_value(token, inline)?;
                set_option(
                    &mut self.options,
                    OPT_VIANAMEIN,
                    &mut self.entry.invflags,
                    self.invert,
                )?;
                self.entry.iniface = parse_interface(&value)?;
                self.entry.nfcache |= NFC_IF_IN;
            }
            'o' => {
                let value = self.inverse_value(token, inline)?;
                set_option(
                    &mut self.options,
                    OPT_VIANAMEOUT,
                    &mut self.entry.invflags,
                    self.invert,
                )?;
                self.entry.outiface = parse_interface(&value)?;
                self.entry.nfcache |= NFC_IF_OUT;
            }
            'v' => {
                if self.verbose == 0 {
                    set_option(
                        &mut self.options,
                        OPT_VERBOSE,
                        &mut self.entry.invflags,
                        self.invert,
                    )?;
                }
                self.verbose += 1;
            }
            'm' => {
                if self.invert {
                    return Err(param("unexpected ! flag before --match"));
                }
                let value = self.required_value(token, inline)?;
                let idx = self
                    .ctx
                    .registry
                    .find_match(&value, LoadPolicy::MustLoad)?
                    .ok_or_else(|| param(format!("couldn't load match `{value}'")))?;
                self.push_match(idx);
            }
            'n' => {
                set_option(
                    &mut self.options,
                    OPT_NUMERIC,
                    &mut self.entry.invflags,
                    self.invert,
                )?;
            }
            't' => {
                if self.invert {
                    return Err(param("unexpected ! flag before --table"));
                }
                self.table = self.required_value(token, inline)?;
            }
            'x' => {
                set_option(
                    &mut self.options,
                    OPT_EXPANDED,
                    &mut self.entry.invflags,
                    self.invert,
                )?;
            }
            '0' => {
                set_option(
                    &mut self.options,
                    OPT_LINENUMBERS,
                    &mut self.entry.invflags,
                    self.invert,
                )?;
            }
            _ => return Err(param(format!("Unknown arg `{token}'"))),
        }
        Ok(None)
    }

    /// An option belonging to an extension: resolve the name against
    /// the active scope, dispatch the owning code, and fall back to the
    /// protocol's demand-loaded match when nothing in scope claims it.
    fn handle_extension_option(
        &mut self,
        token: &str,
        name: &str,
        inline: Option<String>,
    ) -> Result<Option<String>> {
        let mut arg: Option<String> = None;
        let mut fetched = false;
        if let Some(opt) = self.resolve_extension_option(name) {
            arg = self.extension_arg(opt.arg, token, inline.clone())?;
            fetched = true;
            if self.dispatch_extension(opt.code, arg.as_deref())? {
                self.invert = false;
                return Ok(None);
            }
        }
        // A pending protocol may demand-load the match that owns this
        // option; the scope has grown, so resolve the name again.
        if self.try_proto_match()? {
            if let Some(opt) = self.resolve_extension_option(name) {
                if !fetched {
                    arg = self.extension_arg(opt.arg, token, inline)?;
                }
                if self.dispatch_extension(opt.code, arg.as_deref())? {
                    self.invert = false;
                    return Ok(None);
                }
            }
        }
        Err(param(format!("Unknown arg `{token}'")))
    }

    /// Resolve an extension option name: the selected target's own
    /// table first, then the selected matches, newest first, then the
    /// merged grammar for extensions registered but not yet selected.
    ///
    /// Several extensions may use the same long name (tcp and udp both
    /// speak `--sport`); scope order decides which code the name means.
    fn resolve_extension_option(&self, name: &str) -> Option<LongOpt> {
        if let Some(t) = &self.target {
            if let Some(idx) = t.idx {
                if let Some(opt) = self.ctx.registry.target_option(idx, name) {
                    return Some(opt);
                }
            }
        }
        for m in self.matches.iter().rev() {
            if let Some(opt) = self.ctx.registry.match_option(m.idx, name) {
                return Some(opt);
            }
        }
        self.ctx
            .registry
            .find_long(name)
            .copied()
            .filter(|opt| opt.code >= OPTION_OFFSET)
    }

    fn extension_arg(
        &mut self,
        kind: ArgKind,
        token: &str,
        inline: Option<String>,
    ) -> Result<Option<String>> {
        Ok(match kind {
            ArgKind::Required => Some(self.required_value(token, inline)?),
            ArgKind::Optional => inline,
            ArgKind::None => None,
        })
    }

    /// Route an extension option code to the extension whose merged
    /// offset range owns it. Only a selected target or match can claim
    /// its codes; anything else stays unclaimed.
    fn dispatch_extension(&mut self, code: u32, arg: Option<&str>) -> Result<bool> {
        let invert = self.invert;
        match self.ctx.registry.owner_of(code) {
            Some(OptionOwner::Target(idx)) => {
                if let Some(t) = self.target.as_mut() {
                    if t.idx == Some(idx) {
                        let local = code - self.ctx.registry.target_offset(idx);
                        let ext = self.ctx.registry.target_at(idx);
                        return Ok(ext.parse(
                            local,
                            arg,
                            invert,
                            &mut t.flags,
                            &mut self.entry,
                            &mut t.data,
                        )?);
                    }
                }
                Ok(false)
            }
            Some(OptionOwner::Match(idx)) => {
                for m in &mut self.matches {
                    if m.idx == idx {
                        let local = code - self.ctx.registry.match_offset(idx);
                        let ext = self.ctx.registry.match_at(idx);
                        return Ok(ext.parse(
                            local,
                            arg,
                            invert,
                            &mut m.flags,
                            &mut self.entry,
                            &mut m.data,
                        )?);
                    }
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// The proto-implies-match rule: `-p tcp` lets `--dport` work
    /// without an explicit `-m tcp`.
    fn try_proto_match(&mut self) -> Result<bool> {
        let Some(pname) = self.protocol.clone() else {
            return Ok(false);
        };
        let numeric = self.options & OPT_NUMERIC != 0;
        let Some(idx) = self.find_proto(&pname, LoadPolicy::TryLoad, numeric)? else {
            return Ok(false);
        };
        if self.matches.iter().any(|m| m.idx == idx) {
            return Ok(false);
        }
        self.push_match(idx);
        Ok(true)
    }

    fn find_proto(
        &mut self,
        pname: &str,
        policy: LoadPolicy,
        numeric: bool,
    ) -> Result<Option<usize>> {
        if let Some(n) = string_to_number(pname, 0, 255) {
            return match proto_to_name(n as u8, numeric, &*self.ctx.protos) {
                Some(name) => Ok(self.ctx.registry.find_match(&name, policy)?),
                None => Ok(None),
            };
        }
        Ok(self.ctx.registry.find_match(pname, policy)?)
    }

    fn push_match(&mut self, idx: usize) {
        let ext = self.ctx.registry.match_at(idx);
        let mut data = vec![0u8; align_up(ext.size())];
        ext.init(&mut data, &mut self.entry.nfcache);
        self.matches.push(PendingMatch {
            idx,
            flags: 0,
            data,
        });
    }

    fn push_target(&mut self, idx: usize, label: &str) {
        let ext = self.ctx.registry.target_at(idx);
        let mut data = vec![0u8; align_up(ext.size())];
        ext.init(&mut data, &mut self.entry.nfcache);
        self.target = Some(PendingTarget {
            idx: Some(idx),
            label: label.to_string(),
            flags: 0,
            data,
        });
    }

    // ========================================================================
    // Post-argv validation
    // ========================================================================

    fn finalize(mut self) -> Result<Invocation> {
        for m in &self.matches {
            self.ctx.registry.match_at(m.idx).final_check(m.flags)?;
        }
        if let Some(t) = &self.target {
            if let Some(idx) = t.idx {
                self.ctx.registry.target_at(idx).final_check(t.flags)?;
            }
        }

        if self.pos < self.args.len() {
            return Err(param("unknown arguments found on commandline"));
        }
        if self.command == CMD_NONE {
            return Err(param("no command specified"));
        }
        if self.invert {
            return Err(param("nothing appropriate following !"));
        }

        if self.command & CMD_RULE != 0 {
            if self.src_spec.is_none() {
                self.src_spec = Some("::/0".to_string());
            }
            if self.dst_spec.is_none() {
                self.dst_spec = Some("::/0".to_string());
            }
        }

        let mut saddrs = Vec::new();
        let mut daddrs = Vec::new();
        if let Some(spec) = &self.src_spec {
            let (addrs, mask) = parse_hostnetworkmask(spec, &*self.ctx.resolver)?;
            self.entry.smsk = mask;
            saddrs = addrs;
        }
        if let Some(spec) = &self.dst_spec {
            let (addrs, mask) = parse_hostnetworkmask(spec, &*self.ctx.resolver)?;
            self.entry.dmsk = mask;
            daddrs = addrs;
        }

        if (saddrs.len() > 1 || daddrs.len() > 1)
            && self.entry.invflags & (INV_SRCIP | INV_DSTIP) != 0
        {
            return Err(param(
                "! not allowed with multiple source or destination IP addresses",
            ));
        }
        if self.command == CMD_CHECK && self.entry.invflags != 0 {
            return Err(param(format!(
                "! not allowed with -{}",
                cmd_char(CMD_CHECK)
            )));
        }
        if self.command == CMD_REPLACE && (saddrs.len() != 1 || daddrs.len() != 1) {
            return Err(param(
                "Replacement rule does not specify a unique address",
            ));
        }

        check_options(self.command, self.options)?;

        if let Some(chain) = &self.chain {
            if chain.len() > CHAIN_MAXNAMELEN {
                return Err(param(format!(
                    "chain name `{chain}' too long (must be under {} chars)",
                    CHAIN_MAXNAMELEN + 1
                )));
            }
        }

        Ok(Invocation {
            command: self.command,
            options: self.options,
            chain: self.chain,
            rulenum: self.rulenum,
            newname: self.newname,
            policy_name: self.policy_name,
            table: self.table,
            jumpto: self.jumpto,
            entry: self.entry,
            matches: self.matches,
            target: self.target,
            saddrs,
            daddrs,
        })
    }
}

/// A target name: non-empty, short enough for a chain label, and free
/// of whitespace.
fn parse_target(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(param("Invalid target name (too short)"));
    }
    if name.len() > CHAIN_MAXNAMELEN {
        return Err(param(format!(
            "Invalid target name `{name}' ({CHAIN_MAXNAMELEN} chars max)"
        )));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(param(format!("Invalid target name `{name}'")));
    }
    Ok(name.to_string())
}

/// Rule numbers are 1-based and can't be zero.
fn parse_rulenumber(rule: &str) -> Result<usize> {
    string_to_number(rule, 1, u64::from(u32::MAX))
        .map(|n| n as usize)
        .ok_or_else(|| param(format!("Invalid rule number `{rule}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::LiteralResolver;
    use crate::proto::BuiltinProtos;
    use nf6_abi::{INV_PROTO, IFNAMSIZ};
    use nf6_ext::NullLoader;

    fn ctx() -> Context {
        Context::new(
            Box::new(NullLoader),
            Box::new(LiteralResolver),
            Box::new(BuiltinProtos),
        )
        .unwrap()
    }

    fn compile_args(args: &[&str]) -> Result<Invocation> {
        let args: Vec<String> = args.iter().map(ToString::to_string).collect();
        match compile(&args, &mut ctx())? {
            Compiled::Run(inv) => Ok(*inv),
            Compiled::Message(_) => panic!("expected invocation"),
        }
    }

    #[test]
    fn test_append_accept_offsets() {
        let inv =
            compile_args(&["-A", "FORWARD", "-s", "::/0", "-d", "::/0", "-j", "ACCEPT"]).unwrap();
        assert_eq!(inv.command, CMD_APPEND);
        assert_eq!(inv.chain.as_deref(), Some("FORWARD"));
        assert_eq!(inv.saddrs, vec![Ipv6Addr::UNSPECIFIED]);
        assert_eq!(inv.entry.smsk, Ipv6Addr::UNSPECIFIED);

        let rule = inv.generate_entry(&ctx().registry).unwrap();
        let entry = rule.entry();
        assert_eq!(entry.target_offset as usize, Entry::LEN);
        assert_eq!(
            entry.next_offset,
            entry.target_offset + rule.target().size
        );
        assert_eq!(rule.target_name(), "ACCEPT");
    }

    #[test]
    fn test_defaults_to_any_any() {
        let inv = compile_args(&["-A", "FORWARD", "-j", "DROP"]).unwrap();
        assert_eq!(inv.saddrs, vec![Ipv6Addr::UNSPECIFIED]);
        assert_eq!(inv.daddrs, vec![Ipv6Addr::UNSPECIFIED]);
    }

    #[test]
    fn test_inverted_source_with_protocol() {
        let inv =
            compile_args(&["-A", "FORWARD", "-p", "TCP", "!", "-s", "2001:db8::1", "-j", "DROP"])
                .unwrap();
        assert_eq!(inv.entry.proto, 6);
        assert_eq!(inv.entry.flags & F_PROTO, F_PROTO);
        assert_eq!(inv.entry.invflags, INV_SRCIP);
        assert_eq!(inv.saddrs, vec!["2001:db8::1".parse::<Ipv6Addr>().unwrap()]);
        assert_eq!(inv.entry.smsk, nf6_abi::prefix_mask(128));
        assert_eq!(inv.jumpto, "DROP");
    }

    #[test]
    fn test_value_position_bang() {
        let inv = compile_args(&["-A", "INPUT", "-p", "!", "udp", "-j", "DROP"]).unwrap();
        assert_eq!(inv.entry.proto, 17);
        assert_eq!(inv.entry.invflags, INV_PROTO);
    }

    #[test]
    fn test_wildcard_interface_and_mpls() {
        let inv = compile_args(&[
            "-A", "FORWARD", "-i", "eth0+", "-j", "MPLS", "--nhlfe", "0x2a",
        ])
        .unwrap();
        assert_eq!(inv.entry.iniface.name_str(), "eth0");
        assert!(inv.entry.iniface.mask[..4].iter().all(|&b| b == 0xFF));
        assert!(inv.entry.iniface.mask[4..IFNAMSIZ].iter().all(|&b| b == 0));
        let t = inv.target.as_ref().unwrap();
        assert_eq!(t.label, "MPLS");
        assert_eq!(u32::from_le_bytes([t.data[0], t.data[1], t.data[2], t.data[3]]), 0x2a);
    }

    #[test]
    fn test_insert_with_rulenum() {
        let inv = compile_args(&["-I", "INPUT", "3", "-s", "fe80::/10", "-j", "ACCEPT"]).unwrap();
        assert_eq!(inv.command, CMD_INSERT);
        assert_eq!(inv.rulenum, 3);
        assert_eq!(inv.entry.smsk, nf6_abi::prefix_mask(10));
        let inv = compile_args(&["-I", "INPUT", "-j", "ACCEPT"]).unwrap();
        assert_eq!(inv.rulenum, 1);
    }

    #[test]
    fn test_delete_num() {
        let inv = compile_args(&["-D", "FORWARD", "2"]).unwrap();
        assert_eq!(inv.command, CMD_DELETE_NUM);
        assert_eq!(inv.rulenum, 2);
    }

    #[test]
    fn test_proto_implies_match() {
        let inv = compile_args(&["-A", "FORWARD", "-p", "tcp", "--dport", "80", "-j", "DROP"])
            .unwrap();
        assert_eq!(inv.matches.len(), 1);
        let m = &inv.matches[0];
        // dpts live at offset 4 of the tcp payload.
        assert_eq!(u16::from_le_bytes([m.data[4], m.data[5]]), 80);
    }

    #[test]
    fn test_explicit_match_claims_options() {
        let inv = compile_args(&[
            "-A", "FORWARD", "-m", "udp", "--sport", "53", "-j", "ACCEPT",
        ])
        .unwrap();
        assert_eq!(inv.matches.len(), 1);
        let m = &inv.matches[0];
        assert_eq!(u16::from_le_bytes([m.data[0], m.data[1]]), 53);
    }

    #[test]
    fn test_same_name_option_routes_to_newest_match() {
        // tcp and udp both speak --sport; each occurrence goes to the
        // most recently selected match.
        let inv = compile_args(&[
            "-A", "FORWARD", "-m", "tcp", "--sport", "80", "-m", "udp", "--sport", "53", "-j",
            "ACCEPT",
        ])
        .unwrap();
        assert_eq!(inv.matches.len(), 2);
        let tcp = &inv.matches[0];
        assert_eq!(u16::from_le_bytes([tcp.data[0], tcp.data[1]]), 80);
        let udp = &inv.matches[1];
        assert_eq!(u16::from_le_bytes([udp.data[0], udp.data[1]]), 53);
    }

    #[test]
    fn test_bang_before_jump_rejected() {
        let err = compile_args(&["-A", "FORWARD", "-s", "::1", "!", "-j", "ACCEPT"]).unwrap_err();
        assert_eq!(err.to_string(), "cannot have ! before -j");
    }

    #[test]
    fn test_unknown_target_load_failure() {
        let err = compile_args(&["-A", "FORWARD", "-j", "MADEUP", "--bogus", "1"]).unwrap_err();
        assert_eq!(err.to_string(), "Unknown arg `--bogus'");
    }

    #[test]
    fn test_unknown_arg() {
        let err = compile_args(&["-A", "FORWARD", "--frobnicate", "-j", "DROP"]).unwrap_err();
        assert_eq!(err.to_string(), "Unknown arg `--frobnicate'");
    }

    #[test]
    fn test_no_command() {
        let err = compile_args(&["-s", "::1"]).unwrap_err();
        assert_eq!(err.to_string(), "no command specified");
    }

    #[test]
    fn test_double_bang() {
        let err = compile_args(&["-A", "FORWARD", "!", "!", "-s", "::1"]).unwrap_err();
        assert_eq!(err.to_string(), "multiple consecutive ! not allowed");
    }

    #[test]
    fn test_trailing_bang() {
        let err = compile_args(&["-A", "FORWARD", "-j", "DROP", "!"]).unwrap_err();
        assert_eq!(err.to_string(), "nothing appropriate following !");
    }

    #[test]
    fn test_replace_requires_unique_addresses() {
        let inv = compile_args(&["-R", "FORWARD", "1", "-j", "DROP"]).unwrap();
        // ::/0 expands to exactly one address, so this passes; a
        // multi-address replacement is exercised via a resolver in the
        // integration tests.
        assert_eq!(inv.command, CMD_REPLACE);
        let err = compile_args(&["-R", "FORWARD"]).unwrap_err();
        assert_eq!(err.to_string(), "-R requires a rule number");
    }

    #[test]
    fn test_zero_proto_invert_never_matches() {
        let err = compile_args(&["-A", "INPUT", "-p", "!", "all", "-j", "DROP"]).unwrap_err();
        assert_eq!(err.to_string(), "rule would never match protocol");
    }

    #[test]
    fn test_list_zero_composite_and_flags() {
        let inv = compile_args(&["-L", "-Z", "-v", "-n", "-x", "--line-numbers"]).unwrap();
        assert_eq!(inv.command, CMD_LIST | CMD_ZERO);
        assert_eq!(
            inv.options,
            OPT_VERBOSE | OPT_NUMERIC | OPT_EXPANDED | OPT_LINENUMBERS
        );
    }

    #[test]
    fn test_illegal_option_for_command() {
        let err = compile_args(&["-F", "-s", "::1"]).unwrap_err();
        assert_eq!(err.to_string(), "Illegal option `-s' with this command");
    }

    #[test]
    fn test_long_synonyms() {
        let inv = compile_args(&[
            "--append",
            "FORWARD",
            "--source",
            "2001:db8::/32",
            "--jump",
            "ACCEPT",
        ])
        .unwrap();
        assert_eq!(inv.command, CMD_APPEND);
        assert_eq!(inv.entry.smsk, nf6_abi::prefix_mask(32));
    }

    #[test]
    fn test_cluster_shorts() {
        let inv = compile_args(&["-L", "-vx"]).unwrap();
        assert_eq!(inv.options & (OPT_VERBOSE | OPT_EXPANDED), OPT_VERBOSE | OPT_EXPANDED);
    }

    #[test]
    fn test_version_message() {
        let args = vec!["-V".to_string()];
        match compile(&args, &mut ctx()).unwrap() {
            Compiled::Message(msg) => assert_eq!(msg, format!("{PROGRAM_NAME} v{VERSION}")),
            Compiled::Run(_) => panic!("expected message"),
        }
    }

    #[test]
    fn test_help_lists_extensions() {
        let args = vec!["-h".to_string()];
        match compile(&args, &mut ctx()).unwrap() {
            Compiled::Message(msg) => {
                assert!(msg.contains("Usage"));
                assert!(msg.contains("--nhlfe"));
                assert!(msg.contains("--source-port"));
            }
            Compiled::Run(_) => panic!("expected message"),
        }
    }

    #[test]
    fn test_chain_name_too_long() {
        let long = "c".repeat(CHAIN_MAXNAMELEN + 1);
        let err = compile_args(&["-N", &long]).unwrap_err();
        assert!(err.to_string().contains("too long"));
    }

    #[test]
    fn test_table_selection() {
        let inv = compile_args(&["-t", "filter", "-L"]).unwrap();
        assert_eq!(inv.table, "filter");
        let err = compile_args(&["!", "-t", "nat", "-L"]).unwrap_err();
        assert_eq!(err.to_string(), "unexpected ! flag before --table");
    }
}
