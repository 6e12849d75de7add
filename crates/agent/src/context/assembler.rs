//! Reading context assembler.
//!
//! Turns precomputed chart data and the conversation tail into one
//! bounded prompt.
//!
//! # Section order
//!
//! 1. `[Chart Facts]`: summary, placements, aspects, house rulers
//! 2. `[Time Context]`: always for transit readings (placeholder when
//!    absent), otherwise only when supplied
//! 3. `[Partner Chart]` and `[Synastry Aspects]`: synastry readings only
//! 4. `[Question]`
//!
//! # Budgets
//!
//! Every list-like section has a [`SectionBudget`]. Facts are ranked by
//! descending score, stable on ties, NaN last, and the longest ranked
//! prefix that fits both the item and the character limit is kept. When the
//! first fact that overflows still has at least `MIN_CUT_CHARS` of room
//! left, it is cut to fit rather than dropped, so one oversized top fact
//! never empties its section. Free text (summary, partner profile,
//! question) is cut on a char boundary and marked with an ellipsis.
//!
//! # Determinism
//!
//! The same inputs always produce byte-identical output. Nothing here reads
//! the clock or any shared state.

use astrochat_config::{AppConfig, ContextConfig};
use astrochat_core::chart::{ChartFacts, PartnerFacts, ReadingType, ScoredFact, TimeContext};
use astrochat_core::message::ConversationTurn;
use astrochat_core::provider::CanonicalRequest;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::templates;
use super::token::{estimate_tokens, estimate_turns_tokens};

/// Characters allowed per list item when a budget is derived from an item count.
pub const LIST_ITEM_CHARS: usize = 160;

/// Cap for short labels (time label, partner name).
const LABEL_CHARS: usize = 80;

pub const MISSING_PARTNER: &str = "missing partner chart";
pub const MISSING_TIME: &str = "no time context supplied";
const NONE: &str = "(none)";
const ELLIPSIS: char = '…';

/// Smallest remainder worth filling with a cut-down fact.
const MIN_CUT_CHARS: usize = 16;

// ── Types ──────────────────────────────────────────────────────────────────

/// Limits for one list-like section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionBudget {
    pub max_items: usize,
    pub max_chars: usize,
}

impl SectionBudget {
    pub fn new(max_items: usize, max_chars: usize) -> Self {
        Self {
            max_items,
            max_chars,
        }
    }

    /// A budget of `max_items` items at [`LIST_ITEM_CHARS`] each.
    pub fn items(max_items: usize) -> Self {
        Self::new(max_items, max_items.saturating_mul(LIST_ITEM_CHARS))
    }
}

/// All budgets the assembler enforces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudget {
    pub placements: SectionBudget,
    pub aspects: SectionBudget,
    pub house_rulers: SectionBudget,
    pub transits: SectionBudget,
    pub progressions: SectionBudget,
    pub synastry_aspects: SectionBudget,
    pub summary_chars: usize,
    pub partner_chars: usize,
    pub question_chars: usize,
    pub max_tail_turns: usize,
    pub tail_chars: usize,
}

impl ContextBudget {
    pub fn from_config(config: &ContextConfig) -> Self {
        Self {
            placements: SectionBudget::items(config.placements),
            aspects: SectionBudget::items(config.aspects),
            house_rulers: SectionBudget::items(config.house_rulers),
            transits: SectionBudget::items(config.transits),
            progressions: SectionBudget::items(config.progressions),
            synastry_aspects: SectionBudget::items(config.synastry_aspects),
            summary_chars: config.summary_chars,
            partner_chars: config.partner_chars,
            question_chars: config.question_chars,
            max_tail_turns: config.max_tail_turns,
            tail_chars: config.tail_max_chars,
        }
    }
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self::from_config(&ContextConfig::default())
    }
}

/// Sampling values copied onto every assembled request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingDefaults {
    /// `0` defers to the provider's configured default.
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl SamplingDefaults {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_tokens: 0,
            temperature: config.default_temperature,
            top_p: config.default_top_p,
        }
    }
}

impl Default for SamplingDefaults {
    fn default() -> Self {
        Self {
            max_tokens: 0,
            temperature: 0.7,
            top_p: 1.0,
        }
    }
}

/// Everything one assembly looks at.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyInput<'a> {
    pub reading: ReadingType,
    pub chart: &'a ChartFacts,
    pub time: Option<&'a TimeContext>,
    pub partner: Option<&'a PartnerFacts>,
    /// Prior turns, oldest first.
    pub tail: &'a [ConversationTurn],
    pub question: &'a str,
}

impl<'a> AssemblyInput<'a> {
    pub fn new(reading: ReadingType, chart: &'a ChartFacts, question: &'a str) -> Self {
        Self {
            reading,
            chart,
            time: None,
            partner: None,
            tail: &[],
            question,
        }
    }

    pub fn with_time(mut self, time: &'a TimeContext) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_partner(mut self, partner: &'a PartnerFacts) -> Self {
        self.partner = Some(partner);
        self
    }

    pub fn with_tail(mut self, tail: &'a [ConversationTurn]) -> Self {
        self.tail = tail;
        self
    }
}

/// Per-section accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionStats {
    pub name: String,
    pub chars: usize,
    pub items_included: usize,
    pub items_total: usize,
}

/// What a section lost to its budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropInfo {
    pub section: String,
    pub items_dropped: usize,
    pub chars_dropped: usize,
    pub reason: String,
}

/// Metadata about one assembly, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    pub reading: ReadingType,
    pub sections: Vec<SectionStats>,
    pub drops: Vec<DropInfo>,
    /// Sections that were required but not supplied.
    pub missing: Vec<String>,
    pub total_chars: usize,
    pub estimated_tokens: usize,
}

/// The result of an assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    /// Reading template for the system role.
    pub system_prompt: String,
    /// The rendered fact sections, without the question.
    pub context: String,
    /// The question after truncation.
    pub question: String,
    /// Sections followed by the `[Question]` block.
    pub prompt: String,
    /// Tail turns that fit the budget, oldest first.
    pub prior_turns: Vec<ConversationTurn>,
    pub metadata: AssemblyMetadata,
}

impl AssembledContext {
    /// Build the canonical request.
    ///
    /// Chart sections ride in the system prompt so that only the question
    /// becomes the persisted user turn.
    pub fn into_request(self, defaults: &SamplingDefaults) -> CanonicalRequest {
        let system = format!("{}\n\n{}", self.system_prompt, self.context);
        CanonicalRequest::new(self.question)
            .with_system_prompt(system)
            .with_tail(self.prior_turns)
            .with_max_tokens(defaults.max_tokens)
            .with_sampling(defaults.temperature, defaults.top_p)
    }
}

// ── Assembler ──────────────────────────────────────────────────────────────

/// Builds bounded prompts for readings.
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    budget: ContextBudget,
}

impl ContextAssembler {
    pub fn new(budget: ContextBudget) -> Self {
        Self { budget }
    }

    pub fn from_config(config: &ContextConfig) -> Self {
        Self::new(ContextBudget::from_config(config))
    }

    pub fn budget(&self) -> &ContextBudget {
        &self.budget
    }

    /// Render the prompt string for a reading.
    ///
    /// `tail` only decides [`AssembledContext::prior_turns`] in
    /// [`assemble`](Self::assemble); it is never interpolated into the text.
    pub fn build(
        &self,
        reading: ReadingType,
        chart: &ChartFacts,
        partner: Option<&PartnerFacts>,
        tail: &[ConversationTurn],
        question: &str,
    ) -> String {
        let mut input = AssemblyInput::new(reading, chart, question).with_tail(tail);
        input.partner = partner;
        self.assemble(&input).prompt
    }

    /// Assemble the full context. Never fails.
    pub fn assemble(&self, input: &AssemblyInput<'_>) -> AssembledContext {
        let mut sections = Vec::new();
        let mut rendered = Vec::new();
        let mut drops = Vec::new();
        let mut missing = Vec::new();

        rendered.push(self.render_chart(input.chart, &mut sections, &mut drops));

        match (input.time, input.reading) {
            (Some(time), _) => rendered.push(self.render_time(time, &mut sections, &mut drops)),
            (None, ReadingType::Transit) => {
                missing.push("time_context".to_string());
                rendered.push(format!("[Time Context]\n{MISSING_TIME}"));
            }
            (None, _) => {}
        }

        if input.reading == ReadingType::Synastry {
            match input.partner {
                Some(partner) => {
                    rendered.push(self.render_partner(partner, &mut sections, &mut drops));
                    rendered.push(self.render_synastry(partner, &mut sections, &mut drops));
                }
                None => {
                    missing.push("partner_chart".to_string());
                    rendered.push(format!("[Partner Chart]\n{MISSING_PARTNER}"));
                }
            }
        }

        let context = rendered.join("\n\n");

        let question_total = input.question.trim().chars().count();
        let question = truncate_chars(input.question.trim(), self.budget.question_chars);
        let question_chars = question.chars().count();
        sections.push(SectionStats {
            name: "question".into(),
            chars: question_chars,
            items_included: 1,
            items_total: 1,
        });
        if question_chars < question_total {
            drops.push(truncation_drop("question", question_total - question_chars));
        }

        let prompt = format!("{context}\n\n[Question]\n{question}");

        let (prior_turns, tail_stats, tail_drop) = self.select_tail(input.tail);
        sections.push(tail_stats);
        drops.extend(tail_drop);

        let system_prompt = templates::system_prompt(input.reading);
        let total_chars = system_prompt.chars().count() + prompt.chars().count();
        let estimated_tokens = estimate_tokens(&system_prompt)
            + estimate_tokens(&prompt)
            + estimate_turns_tokens(&prior_turns);

        AssembledContext {
            system_prompt,
            context,
            question,
            prompt,
            prior_turns,
            metadata: AssemblyMetadata {
                reading: input.reading,
                sections,
                drops,
                missing,
                total_chars,
                estimated_tokens,
            },
        }
    }

    // ── Sections ───────────────────────────────────────────────────────────

    fn render_chart(
        &self,
        chart: &ChartFacts,
        sections: &mut Vec<SectionStats>,
        drops: &mut Vec<DropInfo>,
    ) -> String {
        let mut out = String::from("[Chart Facts]");
        let mut body = false;

        let summary = chart.summary.trim();
        if !summary.is_empty() {
            let kept = truncate_chars(summary, self.budget.summary_chars);
            let total = summary.chars().count();
            let kept_chars = kept.chars().count();
            sections.push(SectionStats {
                name: "summary".into(),
                chars: kept_chars,
                items_included: 1,
                items_total: 1,
            });
            if kept_chars < total {
                drops.push(truncation_drop("summary", total - kept_chars));
            }
            if !kept.is_empty() {
                out.push_str("\nSummary: ");
                out.push_str(&kept);
                body = true;
            }
        }

        let lists = [
            ("placements", "Placements:", &chart.placements, self.budget.placements),
            ("aspects", "Aspects:", &chart.aspects, self.budget.aspects),
            ("house_rulers", "House rulers:", &chart.house_rulers, self.budget.house_rulers),
        ];
        for (name, heading, facts, budget) in lists {
            if facts.is_empty() {
                continue;
            }
            let (lines, stats, drop) = select_facts(name, facts, budget);
            sections.push(stats);
            drops.extend(drop);
            if !lines.is_empty() {
                out.push('\n');
                out.push_str(heading);
                push_lines(&mut out, &lines);
                body = true;
            }
        }

        if !body {
            out.push('\n');
            out.push_str(NONE);
        }
        out
    }

    fn render_time(
        &self,
        time: &TimeContext,
        sections: &mut Vec<SectionStats>,
        drops: &mut Vec<DropInfo>,
    ) -> String {
        let label = truncate_chars(time.label.trim(), LABEL_CHARS);
        let mut out = if label.is_empty() {
            String::from("[Time Context]")
        } else {
            format!("[Time Context: {label}]")
        };
        let mut body = false;

        let lists = [
            ("transits", "Transits:", &time.transits, self.budget.transits),
            (
                "progressions",
                "Progressions:",
                &time.progressions,
                self.budget.progressions,
            ),
        ];
        for (name, heading, facts, budget) in lists {
            if facts.is_empty() {
                continue;
            }
            let (lines, stats, drop) = select_facts(name, facts, budget);
            sections.push(stats);
            drops.extend(drop);
            if !lines.is_empty() {
                out.push('\n');
                out.push_str(heading);
                push_lines(&mut out, &lines);
                body = true;
            }
        }

        if !body {
            out.push('\n');
            out.push_str(NONE);
        }
        out
    }

    fn render_partner(
        &self,
        partner: &PartnerFacts,
        sections: &mut Vec<SectionStats>,
        drops: &mut Vec<DropInfo>,
    ) -> String {
        let name = partner
            .name
            .as_deref()
            .map(|n| truncate_chars(n.trim(), LABEL_CHARS))
            .unwrap_or_default();
        let header = if name.is_empty() {
            String::from("[Partner Chart]")
        } else {
            format!("[Partner Chart: {name}]")
        };

        let profile = partner.profile.trim();
        let kept = truncate_chars(profile, self.budget.partner_chars);
        let total = profile.chars().count();
        let kept_chars = kept.chars().count();
        sections.push(SectionStats {
            name: "partner_profile".into(),
            chars: kept_chars,
            items_included: usize::from(!kept.is_empty()),
            items_total: usize::from(!profile.is_empty()),
        });
        if kept_chars < total {
            drops.push(truncation_drop("partner_profile", total - kept_chars));
        }

        if kept.is_empty() {
            format!("{header}\n{NONE}")
        } else {
            format!("{header}\n{kept}")
        }
    }

    fn render_synastry(
        &self,
        partner: &PartnerFacts,
        sections: &mut Vec<SectionStats>,
        drops: &mut Vec<DropInfo>,
    ) -> String {
        let (lines, stats, drop) = select_facts(
            "synastry_aspects",
            &partner.synastry_aspects,
            self.budget.synastry_aspects,
        );
        sections.push(stats);
        drops.extend(drop);

        let mut out = String::from("[Synastry Aspects]");
        if lines.is_empty() {
            out.push('\n');
            out.push_str(NONE);
        } else {
            push_lines(&mut out, &lines);
        }
        out
    }

    // ── Tail ───────────────────────────────────────────────────────────────

    /// Newest turns first into the turn and char budget; returned oldest first.
    ///
    /// Stops at the first turn that does not fit so the kept window is
    /// always a contiguous suffix of the conversation.
    fn select_tail(
        &self,
        tail: &[ConversationTurn],
    ) -> (Vec<ConversationTurn>, SectionStats, Option<DropInfo>) {
        let mut used = 0usize;
        let mut kept = Vec::new();

        for turn in tail.iter().rev() {
            if kept.len() >= self.budget.max_tail_turns {
                break;
            }
            let cost = turn.content().chars().count();
            if used + cost > self.budget.tail_chars {
                break;
            }
            used += cost;
            kept.push(turn.clone());
        }
        kept.reverse();

        let dropped = &tail[..tail.len() - kept.len()];
        let stats = SectionStats {
            name: "tail".into(),
            chars: used,
            items_included: kept.len(),
            items_total: tail.len(),
        };
        let drop = maybe_drop(
            "tail",
            dropped.len(),
            dropped.iter().map(|t| t.content().chars().count()).sum(),
            "Oldest turns beyond the tail budget",
        );
        (kept, stats, drop)
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

/// Rank facts by descending score; stable on ties, NaN last.
fn rank(facts: &[ScoredFact]) -> Vec<&ScoredFact> {
    let mut ranked: Vec<&ScoredFact> = facts.iter().filter(|f| !f.text.trim().is_empty()).collect();
    ranked.sort_by(|a, b| match (a.score.is_nan(), b.score.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal),
    });
    ranked
}

/// Keep the longest ranked prefix within `budget`. Each line costs its
/// rendered length plus the newline in front of it; the first line that
/// overflows is cut into the remaining room when that room is large enough.
fn select_facts(
    name: &str,
    facts: &[ScoredFact],
    budget: SectionBudget,
) -> (Vec<String>, SectionStats, Option<DropInfo>) {
    let ranked = rank(facts);
    let mut used = 0usize;
    let mut lines = Vec::new();

    for fact in &ranked {
        if lines.len() >= budget.max_items {
            break;
        }
        let line = format!("- {}", fact.text.trim());
        let cost = line.chars().count() + 1;
        if used + cost > budget.max_chars {
            let room = budget.max_chars.saturating_sub(used + 1);
            if room >= MIN_CUT_CHARS {
                let cut = truncate_chars(&line, room);
                used += cut.chars().count() + 1;
                lines.push(cut);
            }
            break;
        }
        used += cost;
        lines.push(line);
    }

    let dropped = &ranked[lines.len()..];
    let stats = SectionStats {
        name: name.to_string(),
        chars: used,
        items_included: lines.len(),
        items_total: ranked.len(),
    };
    let drop = maybe_drop(
        name,
        dropped.len(),
        dropped.iter().map(|f| f.text.trim().chars().count() + 3).sum(),
        "Lowest-scored items beyond the section budget",
    );
    (lines, stats, drop)
}

fn push_lines(out: &mut String, lines: &[String]) {
    for line in lines {
        out.push('\n');
        out.push_str(line);
    }
}

/// Cut `text` to at most `max` chars, ending in an ellipsis when cut.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(max - 1).collect();
    out.push(ELLIPSIS);
    out
}

fn truncation_drop(section: &str, chars_dropped: usize) -> DropInfo {
    DropInfo {
        section: section.to_string(),
        items_dropped: 0,
        chars_dropped,
        reason: "Text truncated to the section budget".into(),
    }
}

fn maybe_drop(section: &str, items: usize, chars: usize, reason: &str) -> Option<DropInfo> {
    (items > 0).then(|| DropInfo {
        section: section.to_string(),
        items_dropped: items,
        chars_dropped: chars,
        reason: reason.to_string(),
    })
}
