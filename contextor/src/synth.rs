//! Answer synthesis: prompt assembly, generation (batch or streamed),
//! template sections and citation extraction.

use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use regex::Regex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::api_types::{AnswerSections, EvidencePassage};
use crate::error::ContextorError;
use crate::prompt::{CONTRACT_SYSTEM, DEFAULT_SYSTEM, build_user_prompt, system_prompt};

/// Streamed generation output.
pub type GenStream = BoxStream<'static, Result<String, ContextorError>>;

/// Text-generation backend.
pub trait Generator: Send + Sync {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
        system: &'a str,
    ) -> BoxFuture<'a, Result<String, ContextorError>>;

    /// Starts a generation whose fragments arrive in order. Dropping the
    /// returned stream must stop the backend.
    fn generate_stream<'a>(
        &'a self,
        prompt: &'a str,
        system: &'a str,
    ) -> BoxFuture<'a, Result<GenStream, ContextorError>>;

    fn model(&self) -> &str;
}

/// Caveat that opens every low-evidence answer.
pub const LOW_EVIDENCE_CAVEAT: &str =
    "Caveat: the retrieved evidence is limited; treat this answer as provisional.\n\n";

/// Answer returned without calling the backend when nothing was retrieved.
pub const NO_EVIDENCE_ANSWER: &str = "Insufficient evidence: no passages in the corpus matched \
this question, so no grounded answer can be given. Try rephrasing, adding a keyword, or \
widening the category filter.";

/// Named answer layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Template {
    /// Executive Summary, Risk Checklist, Response Draft.
    ContractResponse,
}

impl FromStr for Template {
    type Err = ContextorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "contract_response" | "compliance_response" | "rfp_response" => {
                Ok(Template::ContractResponse)
            }
            other => Err(ContextorError::Config(format!("unknown template '{other}'"))),
        }
    }
}

impl Template {
    fn system(&self) -> &'static str {
        match self {
            Template::ContractResponse => CONTRACT_SYSTEM,
        }
    }
}

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:#{1,6}[ \t]*)?(?:\d+[.)][ \t]*)?(?:\*\*)?[ \t]*(executive summary|risk checklist|response draft)[ \t]*(?:\*\*)?(?:[ \t]*\([^)\n]*\))?[ \t]*(?::(?:\*\*)?[ \t]*(.*?))?[ \t\r]*$",
    )
    .expect("section heading regex")
});

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\s*evidence\s*#\s*(\d+)\s*\]").expect("evidence marker regex")
});

/// Splits `text` into the three ordered sections.
///
/// Headings are matched case-insensitively with optional markdown `#`,
/// numbering, bold and trailing colon; content may start on the heading
/// line. Returns `None` unless all three appear in order with content.
pub fn parse_sections(text: &str) -> Option<AnswerSections> {
    struct Heading<'t> {
        start: usize,
        end: usize,
        inline: &'t str,
    }

    let names = ["executive summary", "risk checklist", "response draft"];
    let mut found: Vec<Heading<'_>> = Vec::with_capacity(3);
    let mut from = 0;

    for name in names {
        let h = SECTION_RE.captures_iter(&text[from..]).find_map(|c| {
            let all = c.get(0)?;
            let matched = c.get(1)?.as_str().to_ascii_lowercase();
            (matched == name).then(|| Heading {
                start: from + all.start(),
                end: from + all.end(),
                inline: c.get(2).map_or("", |m| m.as_str()),
            })
        })?;
        from = h.end;
        found.push(h);
    }

    let body = |i: usize| -> String {
        let stop = found.get(i + 1).map_or(text.len(), |n| n.start);
        let rest = text[found[i].end..stop].trim();
        let inline = found[i].inline.trim();
        match (inline.is_empty(), rest.is_empty()) {
            (true, _) => rest.to_string(),
            (false, true) => inline.to_string(),
            (false, false) => format!("{inline}\n{rest}"),
        }
    };

    let sections = AnswerSections {
        executive_summary: body(0),
        risk_checklist: body(1),
        response_draft: body(2),
    };
    if sections.executive_summary.is_empty()
        || sections.risk_checklist.is_empty()
        || sections.response_draft.is_empty()
    {
        return None;
    }
    Some(sections)
}

/// Citation markers found in an answer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Citations {
    /// Valid marker numbers, ascending and unique.
    pub cited: Vec<usize>,
    /// Marker occurrences outside `1..=evidence_len`.
    pub invalid: usize,
    /// All marker occurrences.
    pub total: usize,
}

impl Citations {
    /// Share of marker occurrences that point at real evidence; `None` when
    /// the text cites nothing.
    pub fn valid_ratio(&self) -> Option<f32> {
        (self.total > 0).then(|| (self.total - self.invalid) as f32 / self.total as f32)
    }
}

pub fn extract_citations(text: &str, evidence_len: usize) -> Citations {
    let mut out = Citations::default();
    for c in MARKER_RE.captures_iter(text) {
        out.total += 1;
        match c.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) {
            Some(n) if (1..=evidence_len).contains(&n) => out.cited.push(n),
            _ => out.invalid += 1,
        }
    }
    out.cited.sort_unstable();
    out.cited.dedup();
    out
}

/// First paragraph of a free-text answer.
pub fn first_paragraph(text: &str) -> String {
    text.split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Re-chunks streamed text so that no fragment ends inside a marker.
///
/// A trailing piece that could still grow into a marker (any spacing the
/// citation parser accepts, e.g. `[ Evidence # 12 ]`) is held back until the
/// next push or [`MarkerAligner::finish`]. Concatenating every returned
/// fragment yields exactly the pushed text.
#[derive(Debug, Default)]
pub struct MarkerAligner {
    pending: String,
}

impl MarkerAligner {
    /// Longest tail held back; a longer bracketed run is released as text.
    const MAX_HOLD: usize = 48;

    pub fn push(&mut self, fragment: &str) -> Option<String> {
        self.pending.push_str(fragment);
        let cut = match self.pending.rfind('[') {
            Some(i)
                if self.pending.len() - i <= Self::MAX_HOLD
                    && Self::may_grow_into_marker(&self.pending[i..]) =>
            {
                i
            }
            _ => self.pending.len(),
        };
        if cut == 0 {
            return None;
        }
        let rest = self.pending.split_off(cut);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    pub fn finish(&mut self) -> Option<String> {
        (!self.pending.is_empty()).then(|| std::mem::take(&mut self.pending))
    }

    /// `true` when `tail` is a strict prefix of some `MARKER_RE` match:
    /// `[` ws* `evidence` ws* `#` ws* digits ws* `]`.
    fn may_grow_into_marker(tail: &str) -> bool {
        let mut chars = tail.chars().peekable();
        if chars.next() != Some('[') {
            return false;
        }
        let skip_ws = |c: &mut std::iter::Peekable<std::str::Chars<'_>>| {
            while c.next_if(|ch| ch.is_whitespace()).is_some() {}
        };

        skip_ws(&mut chars);
        for want in "evidence".chars() {
            match chars.next() {
                None => return true,
                Some(ch) if ch.to_ascii_lowercase() == want => {}
                Some(_) => return false,
            }
        }
        skip_ws(&mut chars);
        match chars.next() {
            None => return true,
            Some('#') => {}
            Some(_) => return false,
        }
        skip_ws(&mut chars);
        let mut digits = 0;
        while chars.next_if(|ch| ch.is_ascii_digit()).is_some() {
            digits += 1;
        }
        if digits == 0 {
            return chars.next().is_none();
        }
        skip_ws(&mut chars);
        // Anything left is `]` (complete marker) or text that breaks it.
        chars.next().is_none()
    }
}

/// Result of one batch synthesis.
#[derive(Clone, Debug)]
pub struct Synthesis {
    pub text: String,
    pub summary: String,
    pub sections: Option<AnswerSections>,
    pub template_fallback: bool,
    pub citations: Citations,
    /// `false` when the canned no-evidence answer was used.
    pub generated: bool,
}

/// Builds prompts and drives the generation backend.
#[derive(Clone)]
pub struct Synthesizer {
    generator: Arc<dyn Generator>,
    max_ctx_chars: usize,
    timeout: Duration,
}

impl Synthesizer {
    pub fn new(generator: Arc<dyn Generator>, max_ctx_chars: usize, timeout: Duration) -> Self {
        Self {
            generator,
            max_ctx_chars,
            timeout,
        }
    }

    pub fn model(&self) -> &str {
        self.generator.model()
    }

    /// Batch synthesis.
    ///
    /// With no evidence the canned hedged answer is returned and the backend
    /// is not called.
    ///
    /// # Errors
    /// [`ContextorError::Generation`] / [`ContextorError::Timeout`] when the
    /// backend fails.
    pub async fn synthesize(
        &self,
        question: &str,
        template: Option<&str>,
        evidence: &[EvidencePassage],
        low_evidence: bool,
    ) -> Result<Synthesis, ContextorError> {
        let (template, unknown_template) = resolve_template(template);

        if evidence.is_empty() {
            return Ok(Synthesis {
                text: NO_EVIDENCE_ANSWER.to_string(),
                summary: NO_EVIDENCE_ANSWER.to_string(),
                sections: None,
                template_fallback: template.is_some() || unknown_template,
                citations: Citations::default(),
                generated: false,
            });
        }

        let (system, user) = self.prompts(question, template, evidence, low_evidence);
        let generated = match timeout(self.timeout, self.generator.generate(&user, &system)).await
        {
            Ok(res) => res?,
            Err(_) => {
                return Err(ContextorError::Timeout {
                    stage: "generation",
                    after: self.timeout,
                });
            }
        };

        let sections = template.and_then(|_| parse_sections(&generated));
        let template_fallback = unknown_template || (template.is_some() && sections.is_none());
        if template.is_some() && sections.is_none() {
            warn!("answer does not follow the template sections, returning free text");
        }

        let summary = sections
            .as_ref()
            .map(|s| s.executive_summary.clone())
            .unwrap_or_else(|| first_paragraph(&generated));
        let citations = extract_citations(&generated, evidence.len());
        if citations.invalid > 0 {
            debug!(invalid = citations.invalid, "answer cites unknown evidence");
        }

        let text = if low_evidence {
            format!("{LOW_EVIDENCE_CAVEAT}{generated}")
        } else {
            generated
        };

        Ok(Synthesis {
            text,
            summary,
            sections,
            template_fallback,
            citations,
            generated: true,
        })
    }

    /// Streamed synthesis. Fragments concatenate to the batch text for the
    /// same backend output. A backend failure after the first fragment is
    /// yielded as a final `Err` item; `idle` bounds the wait per fragment.
    ///
    /// # Errors
    /// Fails like [`Self::synthesize`] when the stream cannot be started.
    pub async fn synthesize_stream(
        &self,
        question: &str,
        template: Option<&str>,
        evidence: &[EvidencePassage],
        low_evidence: bool,
    ) -> Result<GenStream, ContextorError> {
        if evidence.is_empty() {
            return Ok(stream::iter([Ok(NO_EVIDENCE_ANSWER.to_string())]).boxed());
        }

        let (template, _) = resolve_template(template);
        let (system, user) = self.prompts(question, template, evidence, low_evidence);
        let inner = match timeout(self.timeout, self.generator.generate_stream(&user, &system))
            .await
        {
            Ok(res) => res?,
            Err(_) => {
                return Err(ContextorError::Timeout {
                    stage: "generation",
                    after: self.timeout,
                });
            }
        };

        let state = AlignState {
            inner,
            aligner: MarkerAligner::default(),
            prefix: low_evidence.then(|| LOW_EVIDENCE_CAVEAT.to_string()),
            idle: self.timeout,
            done: false,
        };
        Ok(stream::unfold(state, AlignState::next).boxed())
    }

    fn prompts(
        &self,
        question: &str,
        template: Option<Template>,
        evidence: &[EvidencePassage],
        low_evidence: bool,
    ) -> (String, String) {
        let base = template.map_or(DEFAULT_SYSTEM, |t| t.system());
        let system = system_prompt(base, low_evidence);
        let (user, used) = build_user_prompt(question, evidence, self.max_ctx_chars);
        if used < evidence.len() {
            debug!(
                used,
                selected = evidence.len(),
                max_chars = self.max_ctx_chars,
                "evidence trimmed to prompt budget"
            );
        }
        (system, user)
    }
}

/// Returns the template and whether an unknown name was requested.
fn resolve_template(name: Option<&str>) -> (Option<Template>, bool) {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        None => (None, false),
        Some(n) => match n.parse::<Template>() {
            Ok(t) => (Some(t), false),
            Err(e) => {
                warn!(error = %e, "falling back to free text");
                (None, true)
            }
        },
    }
}

struct AlignState {
    inner: GenStream,
    aligner: MarkerAligner,
    prefix: Option<String>,
    idle: Duration,
    done: bool,
}

impl AlignState {
    async fn next(mut self) -> Option<(Result<String, ContextorError>, Self)> {
        if let Some(p) = self.prefix.take() {
            return Some((Ok(p), self));
        }
        loop {
            if self.done {
                return None;
            }
            match timeout(self.idle, self.inner.next()).await {
                Ok(Some(Ok(fragment))) => {
                    if let Some(out) = self.aligner.push(&fragment) {
                        return Some((Ok(out), self));
                    }
                }
                Ok(None) => {
                    self.done = true;
                    return self.aligner.finish().map(|rest| (Ok(rest), self));
                }
                Ok(Some(Err(e))) => return Some(self.fail(e)),
                Err(_) => {
                    let e = ContextorError::Timeout {
                        stage: "generation",
                        after: self.idle,
                    };
                    return Some(self.fail(e));
                }
            }
        }
    }

    /// Flushes held text first; the error follows on the next poll.
    fn fail(mut self, e: ContextorError) -> (Result<String, ContextorError>, Self) {
        self.done = true;
        match self.aligner.finish() {
            Some(rest) => {
                self.inner = stream::iter([Err(e)]).boxed();
                self.done = false;
                (Ok(rest), self)
            }
            None => (Err(e), self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::tests::passage;

    #[test]
    fn sections_are_parsed_in_order() {
        let text = "## 1. Executive Summary\nCap is 1x fees [Evidence #1].\n\n\
                    **Risk Checklist:**\n- liability cap: high [Evidence #1]\n\n\
                    3) response draft: We accept the cap [Evidence #2].";
        let s = parse_sections(text).unwrap();
        assert_eq!(s.executive_summary, "Cap is 1x fees [Evidence #1].");
        assert_eq!(s.risk_checklist, "- liability cap: high [Evidence #1]");
        assert_eq!(s.response_draft, "We accept the cap [Evidence #2].");
    }

    #[test]
    fn out_of_order_or_missing_sections_fail() {
        assert!(parse_sections("Risk Checklist:\na\nExecutive Summary:\nb\nResponse Draft:\nc").is_none());
        assert!(parse_sections("Executive Summary:\na\nResponse Draft:\nc").is_none());
        assert!(parse_sections("Executive Summary:\n\nRisk Checklist:\nb\nResponse Draft:\nc").is_none());
        // A heading phrase inside prose is not a heading.
        assert!(parse_sections("The executive summary below is short.").is_none());
    }

    #[test]
    fn citations_are_validated() {
        let c = extract_citations("a [Evidence #2] b [evidence # 1] c [Evidence #9] [Evidence #2]", 3);
        assert_eq!(c.cited, vec![1, 2]);
        assert_eq!(c.invalid, 1);
        assert_eq!(c.total, 4);
        assert_eq!(c.valid_ratio(), Some(0.75));
        assert_eq!(extract_citations("none", 3).valid_ratio(), None);
    }

    #[test]
    fn aligner_never_splits_markers() {
        let pieces = ["See [Evi", "dence #1", "2] and [", "x] end [Evidence #3"];
        let mut a = MarkerAligner::default();
        let mut out = Vec::new();
        for p in pieces {
            out.extend(a.push(p));
        }
        out.extend(a.finish());
        assert_eq!(out.concat(), pieces.concat());
        for f in &out {
            let opens = f.matches('[').count();
            let closes = f.matches(']').count();
            assert!(opens <= closes + usize::from(f.ends_with("[Evidence #3")), "split marker in {f:?}");
        }
        assert_eq!(out[0], "See ");
        assert_eq!(out[1], "[Evidence #12] and ");
    }

    #[test]
    fn aligner_keeps_spaced_markers_whole_at_every_split() {
        let variants = [
            "[Evidence #1]",
            "[Evidence#1]",
            "[Evidence # 1]",
            "[ Evidence #1]",
            "[evidence #12 ]",
            "[EVIDENCE\t#\t3]",
        ];
        for marker in variants {
            let text = format!("see {marker} ok");
            for i in 1..text.len() {
                for j in i..text.len() {
                    let mut a = MarkerAligner::default();
                    let mut out = Vec::new();
                    for piece in [&text[..i], &text[i..j], &text[j..]] {
                        out.extend(a.push(piece));
                    }
                    out.extend(a.finish());
                    assert_eq!(out.concat(), text);
                    let whole: usize = out.iter().map(|f| extract_citations(f, 99).total).sum();
                    assert_eq!(whole, 1, "{marker:?} split at {i}/{j}: {out:?}");
                }
            }
        }
    }

    #[test]
    fn aligner_releases_brackets_that_cannot_become_markers() {
        let mut a = MarkerAligner::default();
        assert_eq!(a.push("a [Evidence #x").as_deref(), Some("a [Evidence #x"));
        assert_eq!(a.push("b [evidence #4 5").as_deref(), Some("b [evidence #4 5"));
        assert_eq!(a.push("c [ evid").as_deref(), Some("c "));
        assert_eq!(a.finish().as_deref(), Some("[ evid"));
    }

    struct Scripted(Vec<&'static str>);

    impl Generator for Scripted {
        fn generate<'a>(
            &'a self,
            _prompt: &'a str,
            _system: &'a str,
        ) -> BoxFuture<'a, Result<String, ContextorError>> {
            Box::pin(async move { Ok(self.0.concat()) })
        }

        fn generate_stream<'a>(
            &'a self,
            _prompt: &'a str,
            _system: &'a str,
        ) -> BoxFuture<'a, Result<GenStream, ContextorError>> {
            let items = self
                .0
                .iter()
                .map(|s| Ok(s.to_string()))
                .collect::<Vec<_>>();
            Box::pin(async move { Ok(stream::iter(items).boxed()) })
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn synth(pieces: Vec<&'static str>) -> Synthesizer {
        Synthesizer::new(Arc::new(Scripted(pieces)), 4000, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn stream_concatenates_to_batch_text() {
        let s = synth(vec!["Cap is 1x [Evid", "ence #1]; term [Evidence #", "2]."]);
        let ev = vec![passage(1, "cap"), passage(2, "term")];
        for low in [false, true] {
            let batch = s.synthesize("q", None, &ev, low).await.unwrap();
            let streamed = s
                .synthesize_stream("q", None, &ev, low)
                .await
                .unwrap()
                .map(|r| r.unwrap())
                .collect::<Vec<_>>()
                .await;
            assert_eq!(streamed.concat(), batch.text);
        }
    }

    #[tokio::test]
    async fn no_evidence_uses_canned_answer() {
        let s = synth(vec!["should not be used"]);
        let batch = s.synthesize("q", None, &[], true).await.unwrap();
        assert_eq!(batch.text, NO_EVIDENCE_ANSWER);
        assert!(!batch.generated);
        let streamed = s
            .synthesize_stream("q", None, &[], true)
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(streamed.concat(), batch.text);
    }

    #[tokio::test]
    async fn unparseable_template_falls_back_to_free_text() {
        let s = synth(vec!["Just one paragraph [Evidence #1].\n\nAnother."]);
        let ev = vec![passage(1, "cap")];
        let out = s
            .synthesize("q", Some("contract_response"), &ev, false)
            .await
            .unwrap();
        assert!(out.sections.is_none());
        assert!(out.template_fallback);
        assert_eq!(out.summary, "Just one paragraph [Evidence #1].");
        assert_eq!(out.citations.cited, vec![1]);
    }

    #[tokio::test]
    async fn template_sections_are_returned() {
        let s = synth(vec![
            "Executive Summary:\nOK [Evidence #1]\nRisk Checklist:\n- cap\nResponse Draft:\n1. Fine",
        ]);
        let ev = vec![passage(1, "cap")];
        let out = s
            .synthesize("q", Some("contract-response"), &ev, false)
            .await
            .unwrap();
        assert!(!out.template_fallback);
        assert_eq!(out.summary, "OK [Evidence #1]");
        assert_eq!(out.sections.unwrap().response_draft, "1. Fine");
    }

    struct Broken;

    impl Generator for Broken {
        fn generate<'a>(
            &'a self,
            _prompt: &'a str,
            _system: &'a str,
        ) -> BoxFuture<'a, Result<String, ContextorError>> {
            Box::pin(async { Err(ContextorError::Generation("backend down".into())) })
        }

        fn generate_stream<'a>(
            &'a self,
            _prompt: &'a str,
            _system: &'a str,
        ) -> BoxFuture<'a, Result<GenStream, ContextorError>> {
            Box::pin(async {
                let items = vec![
                    Ok("partial [Evid".to_string()),
                    Err(ContextorError::Generation("connection reset".into())),
                ];
                Ok(stream::iter(items).boxed())
            })
        }

        fn model(&self) -> &str {
            "broken"
        }
    }

    #[tokio::test]
    async fn mid_stream_error_flushes_then_fails() {
        let s = Synthesizer::new(Arc::new(Broken), 4000, Duration::from_secs(5));
        let ev = vec![passage(1, "cap")];
        let items = s
            .synthesize_stream("q", None, &ev, false)
            .await
            .unwrap()
            .collect::<Vec<_>>()
            .await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_deref().ok(), Some("partial "));
        assert_eq!(items[1].as_deref().ok(), Some("[Evid"));
        assert!(matches!(items[2], Err(ContextorError::Generation(_))));

        let err = s.synthesize("q", None, &ev, false).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
