//! Daily news-sentiment aggregation around an external text classifier.

use std::collections::BTreeMap;

use anyhow::{Result, ensure};
use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::panel::FeaturePanel;

pub const DEFAULT_MAX_ARTICLES_PER_DAY: usize = 10;

/// Probabilities of the negative, neutral and positive classes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassProbabilities {
    pub negative: f64,
    pub neutral: f64,
    pub positive: f64,
}

impl ClassProbabilities {
    /// Softmax over `[negative, neutral, positive]` logits.
    pub fn from_logits(logits: [f64; 3]) -> Self {
        let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exp = logits.map(|l| (l - max).exp());
        let total: f64 = exp.iter().sum();
        Self {
            negative: exp[0] / total,
            neutral: exp[1] / total,
            positive: exp[2] / total,
        }
    }

    /// Continuous score in [-1, 1]; neutral mass carries zero weight.
    pub fn score(&self) -> f64 {
        -self.negative + 0.0 * self.neutral + self.positive
    }
}

/// Any three-class sentiment model.
pub trait SentimentScorer {
    fn class_probabilities(&self, text: &str) -> Result<ClassProbabilities>;
}

/// Blank text scores 0 without consulting the model.
pub fn score_text<S: SentimentScorer + ?Sized>(scorer: &S, text: &str) -> Result<f64> {
    if text.trim().is_empty() {
        return Ok(0.0);
    }
    Ok(scorer.class_probabilities(text)?.score())
}

#[derive(Clone, Debug, PartialEq)]
pub struct Article {
    pub published: NaiveDateTime,
    pub title: String,
    pub description: String,
}

impl Article {
    pub fn text(&self) -> String {
        format!("{}. {}", self.title, self.description)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DailySentiment {
    pub date: NaiveDate,
    pub score: f64,
    pub articles: usize,
}

/// Mean article score per calendar day, ascending by date. Only the first
/// `max_per_day` articles of each day (in input order) are scored.
pub fn daily_average_sentiment<S: SentimentScorer + ?Sized>(
    articles: &[Article],
    scorer: &S,
    max_per_day: usize,
) -> Result<Vec<DailySentiment>> {
    ensure!(max_per_day > 0, "max_per_day must be positive");
    let mut by_day: BTreeMap<NaiveDate, Vec<&Article>> = BTreeMap::new();
    for article in articles {
        let day = by_day.entry(article.published.date()).or_default();
        if day.len() < max_per_day {
            day.push(article);
        }
    }

    let mut daily = Vec::with_capacity(by_day.len());
    for (date, todays) in by_day {
        let mut total = 0.0;
        for article in &todays {
            total += score_text(scorer, &article.text())?;
        }
        debug!(date = %date, articles = todays.len(), "Scored articles");
        daily.push(DailySentiment {
            date,
            score: total / todays.len() as f64,
            articles: todays.len(),
        });
    }
    Ok(daily)
}

/// Single-column panel (`sentiment_score`) suitable for a calendar merge.
pub fn sentiment_panel(daily: &[DailySentiment]) -> Result<FeaturePanel> {
    let mut panel = FeaturePanel::new(daily.iter().map(|d| d.date).collect());
    panel.push("sentiment_score", daily.iter().map(|d| d.score).collect())?;
    Ok(panel)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    struct KeywordScorer {
        calls: Cell<usize>,
    }

    impl SentimentScorer for KeywordScorer {
        fn class_probabilities(&self, text: &str) -> Result<ClassProbabilities> {
            self.calls.set(self.calls.get() + 1);
            Ok(if text.contains("rally") {
                ClassProbabilities {
                    negative: 0.1,
                    neutral: 0.1,
                    positive: 0.8,
                }
            } else {
                ClassProbabilities {
                    negative: 0.6,
                    neutral: 0.4,
                    positive: 0.0,
                }
            })
        }
    }

    fn article(day: u32, hour: u32, title: &str) -> Article {
        Article {
            published: NaiveDate::from_ymd_opt(2024, 5, day)
                .and_then(|d| d.and_hms_opt(hour, 0, 0))
                .expect("valid timestamp"),
            title: title.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn blank_text_skips_the_model() {
        let scorer = KeywordScorer { calls: Cell::new(0) };
        assert_eq!(score_text(&scorer, "   ").expect("score"), 0.0);
        assert_eq!(scorer.calls.get(), 0);
    }

    #[test]
    fn softmax_probabilities_sum_to_one() {
        let probs = ClassProbabilities::from_logits([0.0, 0.0, 0.0]);
        assert!((probs.negative + probs.neutral + probs.positive - 1.0).abs() < 1e-12);
        assert!(probs.score().abs() < 1e-12);
    }

    #[test]
    fn daily_mean_caps_articles_in_input_order() {
        let scorer = KeywordScorer { calls: Cell::new(0) };
        let articles = vec![
            article(2, 15, "rally"),
            article(1, 9, "selloff"),
            article(2, 9, "selloff"),
            article(2, 10, "rally"),
        ];
        let daily = daily_average_sentiment(&articles, &scorer, 2).expect("daily");
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].date, NaiveDate::from_ymd_opt(2024, 5, 1).expect("date"));
        assert!((daily[0].score + 0.6).abs() < 1e-12);
        // day two keeps the 15:00 rally and the 09:00 selloff, dropping 10:00
        assert_eq!(daily[1].articles, 2);
        assert!((daily[1].score - 0.05).abs() < 1e-12);
        assert_eq!(scorer.calls.get(), 3);
    }
}
