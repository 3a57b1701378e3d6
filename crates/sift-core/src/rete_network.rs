//! The discrimination network
//!
//! [`ReteNetwork`] owns every node in a flat arena keyed by [`NodeId`].
//! Edges are plain ids: a node lists its children as [`Link`]s and the
//! network keeps the reverse parent lists used to detach a node when its
//! last rule goes away.
//!
//! ```text
//!   submit ─► root ─► type ─► alpha* ─► join/exists/aggregate* ─► terminal
//!                                                                   │
//!   flush ◄── touched entries                   pending activations ◄┘
//! ```
//!
//! Every public mutation runs to completion, then writes the entries it
//! added or removed in each touched node to the [`MemoryStore`], root memory
//! included. Activation changes are buffered while the change propagates and
//! handed to the [`ActivationHandler`] only once the store accepted them.

use serde::Serialize;
use sift_types::{Fact, FactId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::ast::{Program, RuleExpression, TypeDefinition};
use crate::builder::{RulePlan, Upstream, compile_rule, type_signature};
use crate::config::EngineConfig;
use crate::error::{SiftError, SiftResult};
use crate::lifecycle::{LifecycleManager, Release};
use crate::memory::{MemoryChange, MemoryKey, WorkingMemory};
use crate::node_sharing::{NodeSharingStats, SharingRegistry};
use crate::alpha_memory::TypeNode;
use crate::rete_nodes::{Delta, Link, NodeId, NodeKind, NodeState, Port, ROOT_NODE_ID, ReteNode, Token};
use crate::store::{InMemoryStore, MemoryStore};
use crate::terminal::{ActionDescriptor, Activation, ActivationHandler};

/// Node counts and sharing figures, computed on demand
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetworkStats {
    pub type_nodes: usize,
    pub alpha_nodes: usize,
    pub beta_nodes: usize,
    pub terminal_nodes: usize,
    pub rules: usize,
    pub facts: usize,
    pub sharing_total_shared_alpha_nodes: usize,
    pub sharing_total_rule_references: usize,
    pub sharing_average_sharing_ratio: f64,
}

/// What [`ReteNetwork::load_program`] committed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgramReport {
    pub types_declared: Vec<String>,
    pub rules_added: Vec<String>,
    pub rules_removed: Vec<String>,
    pub facts_submitted: usize,
}

/// A rule currently wired into the network
#[derive(Debug, Clone)]
struct InstalledRule {
    action: ActionDescriptor,
    /// Every node the rule references, upstream first
    nodes: Vec<NodeId>,
    terminal: NodeId,
}

pub struct ReteNetwork {
    nodes: HashMap<NodeId, ReteNode>,
    parents: HashMap<NodeId, Vec<NodeId>>,
    /// Root memory: every submitted fact, whatever its type
    facts: BTreeMap<FactId, Arc<Fact>>,
    types: HashMap<String, TypeDefinition>,
    type_nodes: HashMap<String, NodeId>,
    alpha_registry: SharingRegistry,
    beta_registry: SharingRegistry,
    lifecycle: LifecycleManager,
    rules: HashMap<String, InstalledRule>,
    store: Arc<dyn MemoryStore>,
    config: EngineConfig,
    /// Memory entries to write on the next flush, per node
    dirty: BTreeMap<NodeId, BTreeSet<MemoryKey>>,
    /// Detached nodes whose snapshot must be deleted on the next flush
    deleted: BTreeSet<NodeId>,
    /// Activation changes not yet delivered, in production order
    pending: Vec<(String, Delta)>,
    handler: Option<Box<dyn ActivationHandler>>,
    next_node_id: NodeId,
}

impl fmt::Debug for ReteNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReteNetwork")
            .field("nodes", &self.nodes.len())
            .field("facts", &self.facts.len())
            .field("types", &self.type_nodes.keys().collect::<BTreeSet<_>>())
            .field("rules", &self.rules.keys().collect::<BTreeSet<_>>())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for ReteNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl ReteNetwork {
    /// An empty network with the default configuration and an
    /// [`InMemoryStore`]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        info!(
            alpha_sharing = config.enable_alpha_sharing,
            beta_sharing = config.enable_beta_sharing,
            "Creating RETE network"
        );
        Self {
            nodes: HashMap::new(),
            parents: HashMap::new(),
            facts: BTreeMap::new(),
            types: HashMap::new(),
            type_nodes: HashMap::new(),
            alpha_registry: SharingRegistry::new(),
            beta_registry: SharingRegistry::new(),
            lifecycle: LifecycleManager::new(),
            rules: HashMap::new(),
            store: Arc::new(InMemoryStore::new()),
            config,
            dirty: BTreeMap::new(),
            deleted: BTreeSet::new(),
            pending: Vec::new(),
            handler: None,
            next_node_id: ROOT_NODE_ID + 1,
        }
    }

    /// Replace the memory store. Meant to be called before the network is
    /// used; snapshots already written elsewhere are not migrated.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.store = store;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register the handler that receives activation changes
    pub fn set_activation_handler(&mut self, handler: impl ActivationHandler + 'static) {
        self.handler = Some(Box::new(handler));
    }

    pub fn clear_activation_handler(&mut self) {
        self.handler = None;
    }

    // ========================================================================
    // Schema and rules
    // ========================================================================

    /// Declare a record type and return its type node.
    ///
    /// Re-declaring a type replaces its field list for rules compiled from
    /// now on; the type node and everything below it are kept. A new type
    /// node is filled with the already submitted facts of its type.
    #[instrument(skip(self, definition), fields(type_name = %definition.name))]
    pub fn add_type(&mut self, definition: TypeDefinition) -> SiftResult<NodeId> {
        if definition.name.is_empty() {
            return Err(SiftError::malformed("type without a name"));
        }
        let name = definition.name.clone();
        self.types.insert(name.clone(), definition);
        if let Some(&node_id) = self.type_nodes.get(&name) {
            debug!(node_id = node_id, "Type re-declared");
            return Ok(node_id);
        }

        let node_id = self.allocate_node_id();
        let mut node = ReteNode::new(node_id, type_signature(&name), NodeState::Type(TypeNode::new(node_id, &name)));
        let touched = self.dirty.entry(node_id).or_default();
        for fact in self.facts.values().filter(|f| f.type_name == name) {
            touched.insert(MemoryKey::Fact(fact.id.clone()));
            node.receive(Port::Left, Delta::Add(Token::single(fact.clone())));
        }
        self.nodes.insert(node_id, node);
        self.type_nodes.insert(name.clone(), node_id);
        info!(node_id = node_id, "Type registered");
        self.settle()?;
        Ok(node_id)
    }

    /// Compile a rule and wire it into the network.
    ///
    /// ## Sharing
    ///
    /// Each planned node is looked up by signature first. Alpha nodes are
    /// shared through the alpha registry and join, exists and aggregation
    /// nodes through the beta registry; only nodes that are not found are
    /// created. Either way the rule takes a reference on the node.
    ///
    /// ## Priming
    ///
    /// A created node replays everything its parents currently emit, so a
    /// rule added after facts were submitted sees them immediately and its
    /// activations are delivered like any other.
    ///
    /// ## Errors
    ///
    /// Validation errors leave the network untouched. A store error is
    /// returned after the rule was wired in. Its activations are still
    /// delivered and the touched memories are written by the next
    /// successful flush.
    #[instrument(skip(self, rule), fields(rule_id = %rule.rule_id))]
    pub fn add_rule(&mut self, rule: &RuleExpression) -> SiftResult<()> {
        if self.rules.contains_key(&rule.rule_id) {
            return Err(SiftError::DuplicateRule { rule_id: rule.rule_id.clone() });
        }
        let plan = compile_rule(rule, &self.types, &self.config)?;
        self.install(plan)?;
        self.settle()
    }

    /// Unwire a rule, deleting every node no other rule references.
    /// Returns `false` for an unknown rule. No deactivation is reported for
    /// the rule's activations.
    #[instrument(skip(self))]
    pub fn remove_rule(&mut self, rule_id: &str) -> SiftResult<bool> {
        let Some(rule) = self.rules.remove(rule_id) else {
            warn!(rule_id = rule_id, "Removal of unknown rule ignored");
            return Ok(false);
        };
        let mut deleted = 0;
        for &node_id in rule.nodes.iter().rev() {
            match self.lifecycle.release(node_id, rule_id) {
                Release::CanDelete => {
                    self.delete_node(node_id);
                    deleted += 1;
                }
                Release::Retained(count) => debug!(node_id = node_id, ref_count = count, "Node retained"),
                Release::Unknown => warn!(node_id = node_id, "Rule held no reference on node"),
            }
        }
        info!(nodes_deleted = deleted, nodes_kept = rule.nodes.len() - deleted, "Rule removed");
        self.settle()?;
        Ok(true)
    }

    /// Apply a program: types, then rules, then inline facts, then rule
    /// removals.
    ///
    /// Every type, rule and inline fact is validated before anything is
    /// committed, so a program with one bad rule changes nothing. Store
    /// errors raised while committing abort the remaining steps.
    #[instrument(skip_all, fields(types = program.types.len(), rules = program.expressions.len()))]
    pub fn load_program(&mut self, program: &Program) -> SiftResult<ProgramReport> {
        let mut schema = self.types.clone();
        for definition in &program.types {
            if definition.name.is_empty() {
                return Err(SiftError::malformed("type without a name"));
            }
            schema.insert(definition.name.clone(), definition.clone());
        }

        let mut seen = BTreeSet::new();
        let mut plans = Vec::with_capacity(program.expressions.len());
        for rule in &program.expressions {
            if self.rules.contains_key(&rule.rule_id) || !seen.insert(rule.rule_id.as_str()) {
                return Err(SiftError::DuplicateRule { rule_id: rule.rule_id.clone() });
            }
            plans.push(compile_rule(rule, &schema, &self.config)?);
        }
        let facts = program.facts.iter().map(|entry| entry.to_fact()).collect::<SiftResult<Vec<_>>>()?;

        let mut report = ProgramReport::default();
        for definition in &program.types {
            report.types_declared.push(definition.name.clone());
            self.add_type(definition.clone())?;
        }
        for plan in plans {
            let rule_id = plan.rule_id.clone();
            self.install(plan)?;
            self.settle()?;
            report.rules_added.push(rule_id);
        }
        for fact in facts {
            self.submit_fact(fact)?;
            report.facts_submitted += 1;
        }
        for removal in &program.rule_removals {
            if self.remove_rule(&removal.rule_id)? {
                report.rules_removed.push(removal.rule_id.clone());
            }
        }
        info!(
            types = report.types_declared.len(),
            rules_added = report.rules_added.len(),
            rules_removed = report.rules_removed.len(),
            facts = report.facts_submitted,
            "Program loaded"
        );
        Ok(report)
    }

    /// Parse a JSON program and apply it with [`Self::load_program`]
    pub fn load_program_json(&mut self, text: &str) -> SiftResult<ProgramReport> {
        let program = Program::from_json(text)?;
        self.load_program(&program)
    }

    // ========================================================================
    // Facts
    // ========================================================================

    /// Assert a fact.
    ///
    /// ## Replacement
    ///
    /// A fact whose id is already present replaces the stored one: an
    /// identical fact is a no-op, anything else retracts the old fact and
    /// asserts the new one in the same submission.
    ///
    /// ## Errors
    ///
    /// A fact with a NaN or infinite number is rejected before it reaches
    /// the network. When the store rejects a write the submission is undone,
    /// its activation changes are dropped and the store error is returned.
    #[instrument(skip(self, fact), fields(fact_id = %fact.id, type_name = %fact.type_name))]
    pub fn submit_fact(&mut self, fact: Fact) -> SiftResult<()> {
        if let Some(field) = fact.non_finite_field() {
            return Err(SiftError::InvalidFact {
                fact_id: fact.id.clone(),
                message: format!("field '{field}' is not a finite number"),
            });
        }
        let fact = Arc::new(fact);
        let previous = self.facts.get(&fact.id).cloned();
        if previous.as_deref() == Some(fact.as_ref()) {
            debug!("Identical fact already present");
            return Ok(());
        }
        if let Some(previous) = &previous {
            debug!("Replacing fact");
            self.retract_internal(previous.clone());
        }
        self.assert_internal(fact.clone());
        self.commit(move |network| {
            network.retract_internal(fact);
            if let Some(previous) = previous {
                network.assert_internal(previous);
            }
        })
    }

    /// Retract a fact by id. An unknown id is a warning and returns
    /// `Ok(false)`.
    #[instrument(skip(self))]
    pub fn retract_fact(&mut self, fact_id: &str) -> SiftResult<bool> {
        let Some(fact) = self.facts.get(fact_id).cloned() else {
            warn!(fact_id = fact_id, "Retraction of unknown fact ignored");
            return Ok(false);
        };
        self.retract_internal(fact.clone());
        self.commit(move |network| network.assert_internal(fact))?;
        Ok(true)
    }

    fn assert_internal(&mut self, fact: Arc<Fact>) {
        self.facts.insert(fact.id.clone(), fact.clone());
        self.touch(ROOT_NODE_ID, MemoryKey::Fact(fact.id.clone()));
        match self.type_nodes.get(&fact.type_name).copied() {
            Some(type_node) => self.propagate(type_node, Port::Left, Delta::Add(Token::single(fact))),
            None => debug!(fact_id = %fact.id, type_name = %fact.type_name, "No type node for fact"),
        }
    }

    fn retract_internal(&mut self, fact: Arc<Fact>) {
        self.facts.remove(&fact.id);
        self.touch(ROOT_NODE_ID, MemoryKey::Fact(fact.id.clone()));
        if let Some(type_node) = self.type_nodes.get(&fact.type_name).copied() {
            self.propagate(type_node, Port::Left, Delta::Remove(Token::single(fact)));
        }
    }

    /// Push a delta into `node_id` and on through its children, depth first
    fn propagate(&mut self, node_id: NodeId, port: Port, delta: Delta) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        let key = node.memory_key(port, &delta);
        let outputs = node.receive(port, delta);
        let terminal_rule = match &node.state {
            NodeState::Terminal(terminal) => Some(terminal.rule_id.clone()),
            _ => None,
        };
        let children = node.children.clone();
        self.dirty.entry(node_id).or_default().extend(key);

        if let Some(rule_id) = terminal_rule {
            for delta in outputs {
                debug!(rule_id = %rule_id, token = %delta.token().id(), added = matches!(delta, Delta::Add(_)), "Activation changed");
                self.pending.push((rule_id.clone(), delta));
            }
            return;
        }
        for delta in outputs {
            for link in &children {
                self.propagate(link.target, link.port, delta.clone());
            }
        }
    }

    // ========================================================================
    // Node management
    // ========================================================================

    fn touch(&mut self, node_id: NodeId, key: MemoryKey) {
        self.dirty.entry(node_id).or_default().insert(key);
    }

    fn allocate_node_id(&mut self) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;
        id
    }

    fn registry(&mut self, kind: NodeKind) -> Option<&mut SharingRegistry> {
        match kind {
            NodeKind::Alpha => Some(&mut self.alpha_registry),
            NodeKind::Join | NodeKind::Exists | NodeKind::Aggregate => Some(&mut self.beta_registry),
            NodeKind::Type | NodeKind::Terminal => None,
        }
    }

    /// Materialise a plan, reusing every node whose signature is known
    fn install(&mut self, plan: RulePlan) -> SiftResult<()> {
        let missing = plan.nodes.iter().flat_map(|n| &n.inputs).find_map(|(upstream, _)| match upstream {
            Upstream::Type(name) if !self.type_nodes.contains_key(name) => Some(name),
            _ => None,
        });
        if let Some(name) = missing {
            return Err(SiftError::unknown_type(name.as_str()).in_rule(&plan.rule_id));
        }

        let rule_id = plan.rule_id;
        let mut ids: Vec<NodeId> = Vec::with_capacity(plan.nodes.len());
        let (mut created, mut shared) = (0usize, 0usize);
        for planned in plan.nodes {
            let kind = planned.blueprint.kind();
            let existing = self.registry(kind).and_then(|r| r.find(planned.signature));
            let node_id = match existing {
                Some(node_id) => {
                    debug!(node_id = node_id, kind = %kind, "Sharing existing node");
                    shared += 1;
                    node_id
                }
                None => {
                    let node_id = self.allocate_node_id();
                    let node = ReteNode::new(node_id, planned.signature, planned.blueprint.instantiate(node_id));
                    self.nodes.insert(node_id, node);
                    if let Some(registry) = self.registry(kind) {
                        registry.register(planned.signature, node_id);
                    }
                    self.dirty.entry(node_id).or_default();

                    let mut inputs = Vec::with_capacity(planned.inputs.len());
                    for (upstream, port) in planned.inputs {
                        let parent = match upstream {
                            Upstream::Type(name) => self.type_nodes.get(&name).copied(),
                            Upstream::Planned(index) => ids.get(index).copied(),
                        };
                        let Some(parent) = parent else {
                            return Err(SiftError::malformed("plan references a node it does not define")
                                .in_rule(&rule_id));
                        };
                        self.link(parent, node_id, port);
                        inputs.push((parent, port));
                    }
                    // right inputs first, so an aggregation group is complete
                    // when its key token arrives
                    for (parent, port) in inputs.into_iter().rev() {
                        let tokens = self.nodes.get(&parent).map(ReteNode::outputs).unwrap_or_default();
                        for token in tokens {
                            self.propagate(node_id, port, Delta::Add(token));
                        }
                    }
                    debug!(node_id = node_id, kind = %kind, "Node created");
                    created += 1;
                    node_id
                }
            };
            self.lifecycle.register(node_id, kind, &rule_id);
            ids.push(node_id);
        }

        let Some(&terminal) = ids.last() else {
            return Err(SiftError::malformed("empty rule plan").in_rule(&rule_id));
        };
        info!(rule_id = %rule_id, nodes_created = created, nodes_shared = shared, "Rule added");
        // a plan may reach the same shared node twice
        let mut seen = BTreeSet::new();
        let nodes = ids.into_iter().filter(|id| seen.insert(*id)).collect();
        self.rules.insert(rule_id, InstalledRule { action: plan.action, nodes, terminal });
        Ok(())
    }

    fn link(&mut self, parent: NodeId, child: NodeId, port: Port) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(Link { target: child, port });
        }
        self.parents.entry(child).or_default().push(parent);
    }

    /// Detach a node whose last reference was released
    fn delete_node(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.remove(&node_id) else {
            return;
        };
        let kind = node.kind();
        if let Some(registry) = self.registry(kind) {
            registry.unregister(node.signature, node_id);
        }
        for parent in self.parents.remove(&node_id).unwrap_or_default() {
            if let Some(parent) = self.nodes.get_mut(&parent) {
                parent.children.retain(|link| link.target != node_id);
            }
        }
        self.dirty.remove(&node_id);
        self.deleted.insert(node_id);
        debug!(node_id = node_id, kind = %kind, "Node deleted");
    }

    // ========================================================================
    // Commit
    // ========================================================================

    /// Write the touched entries of every node and drop the deleted
    /// memories. Nodes that were not written stay pending.
    fn flush(&mut self) -> SiftResult<()> {
        let touched: Vec<NodeId> = self.dirty.keys().copied().collect();
        for node_id in touched {
            let Some(keys) = self.dirty.get(&node_id) else {
                continue;
            };
            let change = self.memory_change(node_id, keys);
            self.store.apply_change(node_id, &change)?;
            self.dirty.remove(&node_id);
        }
        let deleted: Vec<NodeId> = self.deleted.iter().copied().collect();
        for node_id in deleted {
            self.store.delete_memory(node_id)?;
            self.deleted.remove(&node_id);
        }
        Ok(())
    }

    /// Current value of each touched entry; entries no longer held are
    /// removals
    fn memory_change(&self, node_id: NodeId, keys: &BTreeSet<MemoryKey>) -> MemoryChange {
        let node = self.nodes.get(&node_id);
        let mut change = MemoryChange::default();
        for key in keys {
            match key {
                MemoryKey::Fact(id) => {
                    let held = if node_id == ROOT_NODE_ID {
                        self.facts.get(id)
                    } else {
                        node.and_then(|n| n.fact_entry(id))
                    };
                    match held {
                        Some(fact) => change.facts.push(fact.clone()),
                        None => change.removed_facts.push(id.clone()),
                    }
                }
                MemoryKey::Token(id) => match node.and_then(|n| n.token_entry(id)) {
                    Some(token) => change.tokens.push(token.clone()),
                    None => change.removed_tokens.push(id.clone()),
                },
            }
        }
        change
    }

    /// Flush and deliver. A rule change stays in effect when the store
    /// fails, so its activations are delivered regardless.
    fn settle(&mut self) -> SiftResult<()> {
        let flushed = self.flush();
        if let Err(err) = &flushed {
            warn!(error = %err, "Store rejected the change; memories stay pending");
        }
        self.deliver();
        flushed
    }

    /// Flush, or undo the change with `rollback` when the store fails
    fn commit(&mut self, rollback: impl FnOnce(&mut Self)) -> SiftResult<()> {
        match self.flush() {
            Ok(()) => {
                self.deliver();
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "Store rejected the change; rolling back");
                rollback(self);
                self.pending.clear();
                if let Err(retry) = self.flush() {
                    warn!(error = %retry, "Store still failing after rollback");
                }
                Err(err)
            }
        }
    }

    /// Hand buffered activation changes to the handler. An activation added
    /// and removed again within one change is not reported at all.
    fn deliver(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        let Some(handler) = self.handler.as_mut() else {
            return;
        };
        let mut skip = vec![false; pending.len()];
        for i in 0..pending.len() {
            let (rule_id, Delta::Add(token)) = &pending[i] else {
                continue;
            };
            let id = token.id();
            let undone = (i + 1..pending.len()).find(|&j| {
                !skip[j] && matches!(&pending[j], (r, Delta::Remove(t)) if r == rule_id && t.id() == id)
            });
            if let Some(j) = undone {
                skip[i] = true;
                skip[j] = true;
            }
        }

        for ((rule_id, delta), skipped) in pending.into_iter().zip(skip) {
            if skipped {
                continue;
            }
            let action = self.rules.get(&rule_id).map(|r| r.action.clone()).unwrap_or_default();
            match delta {
                Delta::Add(token) => handler.activated(&Activation { rule_id, token, action }),
                Delta::Remove(token) => handler.deactivated(&Activation { rule_id, token, action }),
            }
        }
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Current activations of a rule; empty for an unknown rule
    pub fn activations(&self, rule_id: &str) -> Vec<Token> {
        let Some(rule) = self.rules.get(rule_id) else {
            return Vec::new();
        };
        match self.nodes.get(&rule.terminal).map(|n| &n.state) {
            Some(NodeState::Terminal(terminal)) => terminal.activations().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn stats(&self) -> NetworkStats {
        let mut stats = NetworkStats { rules: self.rules.len(), facts: self.facts.len(), ..NetworkStats::default() };
        for node in self.nodes.values() {
            match node.kind() {
                NodeKind::Type => stats.type_nodes += 1,
                NodeKind::Alpha => stats.alpha_nodes += 1,
                NodeKind::Join | NodeKind::Exists | NodeKind::Aggregate => stats.beta_nodes += 1,
                NodeKind::Terminal => stats.terminal_nodes += 1,
            }
        }
        let sharing = self.sharing_stats();
        stats.sharing_total_shared_alpha_nodes = sharing.total_shared_alpha_nodes;
        stats.sharing_total_rule_references = sharing.total_rule_references;
        stats.sharing_average_sharing_ratio = sharing.average_sharing_ratio;
        stats
    }

    pub fn sharing_stats(&self) -> NodeSharingStats {
        let total_shared_alpha_nodes = self.alpha_registry.len();
        let total_rule_references: usize =
            self.alpha_registry.node_ids().map(|id| self.lifecycle.ref_count(id)).sum();
        let average_sharing_ratio = if total_shared_alpha_nodes == 0 {
            0.0
        } else {
            total_rule_references as f64 / total_shared_alpha_nodes as f64
        };
        NodeSharingStats {
            total_shared_alpha_nodes,
            total_rule_references,
            average_sharing_ratio,
            alpha_shares_found: self.alpha_registry.shares_found,
            beta_shares_found: self.beta_registry.shares_found,
            alpha_nodes_created: self.alpha_registry.nodes_registered,
            beta_nodes_created: self.beta_registry.nodes_registered,
        }
    }

    /// Snapshot of a node as last written to the store
    pub fn node_memory(&self, node_id: NodeId) -> SiftResult<Option<WorkingMemory>> {
        self.store.load_memory(node_id)
    }

    pub fn node(&self, node_id: NodeId) -> Option<&ReteNode> {
        self.nodes.get(&node_id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Nodes referenced by a rule, upstream first
    pub fn rule_nodes(&self, rule_id: &str) -> Option<&[NodeId]> {
        self.rules.get(rule_id).map(|r| r.nodes.as_slice())
    }

    pub fn type_node(&self, type_name: &str) -> Option<NodeId> {
        self.type_nodes.get(type_name).copied()
    }

    pub fn ref_count(&self, node_id: NodeId) -> usize {
        self.lifecycle.ref_count(node_id)
    }

    pub fn rule_ids(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn fact(&self, fact_id: &str) -> Option<&Fact> {
        self.facts.get(fact_id).map(Arc::as_ref)
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Action, Expr, PatternBlock, VariableDecl};
    use std::sync::Mutex;

    fn person_type() -> TypeDefinition {
        TypeDefinition::new("Person").field("age", "number").field("name", "string")
    }

    fn adults(id: &str) -> RuleExpression {
        RuleExpression {
            rule_id: id.to_string(),
            patterns: vec![PatternBlock { variables: vec![VariableDecl::typed("p", "Person")] }],
            constraints: Some(Expr::compare(Expr::field("p", "age"), ">=", Expr::number(18.0))),
            action: Action::job("notify"),
        }
    }

    fn person(id: &str, age: i64) -> Fact {
        Fact::new(id, "Person").with_field("age", age)
    }

    #[test]
    fn rules_added_late_see_existing_facts() {
        let mut network = ReteNetwork::new();
        network.add_type(person_type()).unwrap();
        network.submit_fact(person("p1", 30)).unwrap();
        network.add_rule(&adults("r1")).unwrap();
        assert_eq!(network.activations("r1").len(), 1);
    }

    #[test]
    fn types_declared_late_pick_up_root_facts() {
        let mut network = ReteNetwork::new();
        network.submit_fact(person("p1", 30)).unwrap();
        let node_id = network.add_type(person_type()).unwrap();
        assert!(network.node(node_id).is_some_and(|n| n.working_memory().contains_fact("p1")));
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        let mut network = ReteNetwork::new();
        network.add_type(person_type()).unwrap();
        network.add_rule(&adults("r1")).unwrap();
        network.submit_fact(person("p1", 30)).unwrap();

        let err = network.submit_fact(Fact::new("p1", "Person").with_field("age", f64::NAN)).unwrap_err();
        assert!(matches!(err, SiftError::InvalidFact { ref fact_id, .. } if fact_id == "p1"));
        let err = network.submit_fact(Fact::new("p2", "Person").with_field("age", f64::INFINITY)).unwrap_err();
        assert!(err.is_construction());

        assert_eq!(network.fact("p1"), Some(&person("p1", 30)));
        assert!(network.fact("p2").is_none());
        assert_eq!(network.activations("r1").len(), 1);
    }

    #[test]
    fn duplicate_rules_are_rejected() {
        let mut network = ReteNetwork::new();
        network.add_type(person_type()).unwrap();
        network.add_rule(&adults("r1")).unwrap();
        assert!(matches!(network.add_rule(&adults("r1")), Err(SiftError::DuplicateRule { .. })));
    }

    #[test]
    fn handler_sees_additions_and_removals_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut network = ReteNetwork::new();
        network.add_type(person_type()).unwrap();
        network.add_rule(&adults("r1")).unwrap();
        let log = Arc::clone(&seen);
        network.set_activation_handler(Recorder(log));

        network.submit_fact(person("p1", 30)).unwrap();
        network.submit_fact(person("p1", 12)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["+p1".to_string(), "-p1".to_string()]);
    }

    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl ActivationHandler for Recorder {
        fn activated(&mut self, activation: &Activation) {
            self.0.lock().unwrap().push(format!("+{}", activation.token.facts[0].id));
        }

        fn deactivated(&mut self, activation: &Activation) {
            self.0.lock().unwrap().push(format!("-{}", activation.token.facts[0].id));
        }
    }

    #[test]
    fn snapshots_follow_the_network() {
        let store = Arc::new(InMemoryStore::new());
        let mut network = ReteNetwork::new().with_store(store.clone());
        network.add_type(person_type()).unwrap();
        network.add_rule(&adults("r1")).unwrap();
        network.submit_fact(person("p1", 30)).unwrap();

        let terminal = *network.rule_nodes("r1").unwrap().last().unwrap();
        let memory = network.node_memory(terminal).unwrap().unwrap();
        assert_eq!(memory.token_count(), 1);
        assert!(network.node_memory(ROOT_NODE_ID).unwrap().unwrap().contains_fact("p1"));

        network.remove_rule("r1").unwrap();
        assert!(network.node_memory(terminal).unwrap().is_none());
    }
}
