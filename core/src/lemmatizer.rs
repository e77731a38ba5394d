use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use unicode_normalization::UnicodeNormalization;

use crate::html;

lazy_static! {
    static ref RE: Regex = Regex::new(r"(?u)\p{L}[\p{L}\p{N}_']*").expect("valid regex");
    static ref ENGLISH_STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
            "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
            "let's","me","more","most","mustn't","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
            "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
            "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
    // prepositions, conjunctions, particles and interjections
    static ref RUSSIAN_STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "а","без","бы","в","во","вот","да","для","до","ведь","же","за","и","из","или","иль","к","ко",
            "ли","либо","лишь","на","над","не","ни","но","о","об","обо","около","от","по","под","при",
            "про","с","со","среди","то","тоже","у","уж","через","что","чтобы","ах","ох","эх","ой","ну"
        ];
        words.iter().copied().collect()
    };
}

/// Morphological normalization of text into lemmas.
pub trait Lemmatizer: Send + Sync {
    /// Lemma -> occurrence count over the text.
    fn lemma_frequencies(&self, text: &str) -> HashMap<String, u32>;

    /// Distinct lemmas of the text.
    fn lemma_set(&self, text: &str) -> HashSet<String>;

    /// Visible text of an HTML document.
    fn plain_text(&self, html: &str) -> String {
        html::plain_text(html)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    Russian,
}

/// Snowball stemming with stop-word removal, standing in for a dictionary lemmatizer.
pub struct StemmingLemmatizer {
    stemmer: Stemmer,
    stopwords: &'static HashSet<&'static str>,
}

impl StemmingLemmatizer {
    pub fn new(language: Language) -> Self {
        let (algorithm, stopwords) = match language {
            Language::English => (Algorithm::English, &*ENGLISH_STOPWORDS),
            Language::Russian => (Algorithm::Russian, &*RUSSIAN_STOPWORDS),
        };
        Self { stemmer: Stemmer::create(algorithm), stopwords }
    }

    /// NFKC-normalize, lowercase, drop stop words and stem.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let normalized = text.nfkc().collect::<String>().to_lowercase();
        let mut tokens = Vec::new();
        for mat in RE.find_iter(&normalized) {
            let token = mat.as_str();
            if self.stopwords.contains(token) {
                continue;
            }
            tokens.push(self.stemmer.stem(token).into_owned());
        }
        tokens
    }
}

impl Default for StemmingLemmatizer {
    fn default() -> Self {
        Self::new(Language::English)
    }
}

impl Lemmatizer for StemmingLemmatizer {
    fn lemma_frequencies(&self, text: &str) -> HashMap<String, u32> {
        let mut counts = HashMap::new();
        for lemma in self.tokenize(text) {
            *counts.entry(lemma).or_insert(0) += 1;
        }
        counts
    }

    fn lemma_set(&self, text: &str) -> HashSet<String> {
        self.tokenize(text).into_iter().collect()
    }
}
