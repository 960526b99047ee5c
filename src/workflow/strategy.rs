//! Topic classification and research strategy selection.
//!
//! The strategy is computed once at Initialization from keyword heuristics
//! and governs everything the pipeline does afterwards: which stages run,
//! how many sources Discovery asks for, how many get their full content
//! extracted, and which tools take priority. Analysis may upgrade the depth
//! one level, exactly once, when too few credible sources survive filtering.

use serde::{Deserialize, Serialize};

use super::stage::WorkflowStage;

/// Broad category of the research topic, inferred from the keyword.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicType {
    Medical,
    Scientific,
    Technical,
    Financial,
    Commercial,
    General,
}

/// How much work the pipeline invests in a topic.
///
/// Ordered shallow to deep; `escalate`/`degrade` move one level at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDepth {
    Surface,
    Standard,
    Deep,
    Exhaustive,
}

impl ResearchDepth {
    /// One level deeper, saturating at `Exhaustive`.
    #[must_use]
    pub fn escalate(self) -> Self {
        match self {
            ResearchDepth::Surface => ResearchDepth::Standard,
            ResearchDepth::Standard => ResearchDepth::Deep,
            ResearchDepth::Deep | ResearchDepth::Exhaustive => ResearchDepth::Exhaustive,
        }
    }

    /// One level shallower, saturating at `Surface`.
    #[must_use]
    pub fn degrade(self) -> Self {
        match self {
            ResearchDepth::Exhaustive => ResearchDepth::Deep,
            ResearchDepth::Deep => ResearchDepth::Standard,
            ResearchDepth::Standard | ResearchDepth::Surface => ResearchDepth::Surface,
        }
    }

    /// How many results Discovery requests from the search capability.
    #[must_use]
    pub fn discovery_limit(self) -> usize {
        match self {
            ResearchDepth::Surface => 5,
            ResearchDepth::Standard => 10,
            ResearchDepth::Deep => 20,
            ResearchDepth::Exhaustive => 40,
        }
    }

    /// How many top sources Extraction fetches in full. Zero at Surface
    /// depth, where the stage is skipped entirely.
    #[must_use]
    pub fn extraction_top_n(self) -> usize {
        match self {
            ResearchDepth::Surface => 0,
            ResearchDepth::Standard => 3,
            ResearchDepth::Deep => 6,
            ResearchDepth::Exhaustive => 10,
        }
    }

    /// How many authoritative domains Crawling explores. Non-zero only at
    /// the two deepest levels.
    #[must_use]
    pub fn crawl_domains(self) -> usize {
        match self {
            ResearchDepth::Surface | ResearchDepth::Standard => 0,
            ResearchDepth::Deep => 1,
            ResearchDepth::Exhaustive => 2,
        }
    }
}

/// A research tool the pipeline can lean on, in priority order per strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchTool {
    WebSearch,
    AcademicSearch,
    NewsSearch,
    ContentExtraction,
    DomainCrawl,
}

/// The plan governing a single workflow run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub topic_type: TopicType,
    pub depth: ResearchDepth,
    /// Tools in descending priority for this topic type.
    pub tool_priorities: Vec<ResearchTool>,
}

impl Strategy {
    /// Classify the keyword and pick the initial plan.
    ///
    /// Deterministic: the same keyword always yields the same strategy.
    #[must_use]
    pub fn for_keyword(normalized: &str) -> Self {
        let topic_type = classify_topic(normalized);
        let depth = initial_depth(topic_type, normalized);
        Self {
            topic_type,
            depth,
            tool_priorities: tool_priorities(topic_type),
        }
    }

    /// The stage sequence this strategy executes, in order.
    ///
    /// Surface skips Extraction and Crawling; Standard skips Crawling;
    /// Deep and Exhaustive run all eight stages.
    #[must_use]
    pub fn stages(&self) -> Vec<WorkflowStage> {
        let mut stages = vec![
            WorkflowStage::Initialization,
            WorkflowStage::Discovery,
            WorkflowStage::Analysis,
        ];
        if self.depth.extraction_top_n() > 0 {
            stages.push(WorkflowStage::Extraction);
        }
        if self.depth.crawl_domains() > 0 {
            stages.push(WorkflowStage::Crawling);
        }
        stages.extend([
            WorkflowStage::Synthesis,
            WorkflowStage::Validation,
            WorkflowStage::Completion,
        ]);
        stages
    }

    /// The stage after `current` under this strategy.
    #[must_use]
    pub fn next_stage(&self, current: WorkflowStage) -> Option<WorkflowStage> {
        let stages = self.stages();
        let position = stages.iter().position(|s| *s == current)?;
        stages.get(position + 1).copied()
    }
}

fn classify_topic(normalized: &str) -> TopicType {
    const MEDICAL: &[&str] = &[
        "health", "medical", "disease", "symptom", "treatment", "diet", "blood", "sugar",
        "diabetes", "cancer", "therapy", "drug", "vaccine", "nutrition", "keto", "monitoring",
    ];
    const SCIENTIFIC: &[&str] = &[
        "research", "study", "physics", "chemistry", "biology", "climate", "quantum", "genome",
        "experiment", "theory",
    ];
    const TECHNICAL: &[&str] = &[
        "software", "programming", "api", "database", "cloud", "algorithm", "machine learning",
        "encryption", "network", "rust", "kubernetes",
    ];
    const FINANCIAL: &[&str] = &[
        "stock", "invest", "market", "crypto", "tax", "mortgage", "loan", "retirement",
        "inflation", "interest rate",
    ];
    const COMMERCIAL: &[&str] = &[
        "best", "review", "price", "buy", "cheap", "vs", "comparison", "top 10", "deal",
        "alternative",
    ];

    let matches = |markers: &[&str]| markers.iter().any(|m| normalized.contains(m));
    if matches(MEDICAL) {
        TopicType::Medical
    } else if matches(TECHNICAL) {
        TopicType::Technical
    } else if matches(FINANCIAL) {
        TopicType::Financial
    } else if matches(SCIENTIFIC) {
        TopicType::Scientific
    } else if matches(COMMERCIAL) {
        TopicType::Commercial
    } else {
        TopicType::General
    }
}

fn initial_depth(topic_type: TopicType, normalized: &str) -> ResearchDepth {
    // Accuracy-sensitive topics start deeper; short generic keywords start
    // shallow and earn escalation through Analysis if needed.
    let word_count = normalized.split_whitespace().count();
    match topic_type {
        TopicType::Medical | TopicType::Scientific | TopicType::Financial => ResearchDepth::Deep,
        TopicType::Technical => ResearchDepth::Standard,
        TopicType::Commercial => ResearchDepth::Standard,
        TopicType::General if word_count >= 4 => ResearchDepth::Standard,
        TopicType::General => ResearchDepth::Surface,
    }
}

fn tool_priorities(topic_type: TopicType) -> Vec<ResearchTool> {
    match topic_type {
        TopicType::Medical | TopicType::Scientific => vec![
            ResearchTool::AcademicSearch,
            ResearchTool::WebSearch,
            ResearchTool::ContentExtraction,
            ResearchTool::DomainCrawl,
        ],
        TopicType::Financial => vec![
            ResearchTool::NewsSearch,
            ResearchTool::WebSearch,
            ResearchTool::ContentExtraction,
        ],
        TopicType::Technical => vec![
            ResearchTool::WebSearch,
            ResearchTool::ContentExtraction,
            ResearchTool::DomainCrawl,
        ],
        TopicType::Commercial | TopicType::General => {
            vec![ResearchTool::WebSearch, ResearchTool::ContentExtraction]
        }
    }
}
