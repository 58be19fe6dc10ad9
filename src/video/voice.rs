use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::video::config::VoiceSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

/// Resolved voice parameters handed to the speech backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceProfile {
    pub voice_name: String,
    pub language_code: String,
    pub speaking_rate: f32,
    pub pitch: f32,
}

impl VoiceProfile {
    pub fn for_gender(gender: Gender, settings: &VoiceSettings) -> Self {
        let voice_name = match gender {
            Gender::Female => settings.female_voice.clone(),
            Gender::Male => settings.male_voice.clone(),
        };
        Self {
            voice_name,
            language_code: settings.language_code.clone(),
            speaking_rate: settings.speaking_rate,
            pitch: settings.pitch,
        }
    }
}

/// Word-to-reading substitutions applied to note text before synthesis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PronunciationDictionary {
    // longest key first so "GPU cluster" wins over "GPU"
    entries: Vec<(String, String)>,
}

impl PronunciationDictionary {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading pronunciation dictionary {}", path.display()))?;
        let table: BTreeMap<String, String> = toml::from_str(&contents)
            .with_context(|| format!("parsing pronunciation dictionary {}", path.display()))?;
        Ok(Self::from_pairs(table))
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut entries: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        entries.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()).then(a.0.cmp(&b.0)));
        Self { entries }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Replace every occurrence of each word, longest words first. Text that
    /// was produced by a replacement is not matched again.
    pub fn apply(&self, text: &str) -> String {
        if self.entries.is_empty() {
            return text.to_string();
        }

        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        'scan: while !rest.is_empty() {
            for (word, reading) in &self.entries {
                if rest.starts_with(word.as_str()) {
                    out.push_str(reading);
                    rest = &rest[word.len()..];
                    continue 'scan;
                }
            }
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push(c);
            }
            rest = chars.as_str();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn gender_selects_configured_voice() {
        let settings = VoiceSettings::default();
        let female = VoiceProfile::for_gender(Gender::Female, &settings);
        let male = VoiceProfile::for_gender(Gender::Male, &settings);
        assert_eq!(female.voice_name, "ja-JP-Neural2-B");
        assert_eq!(male.voice_name, "ja-JP-Neural2-C");
        assert_eq!(male.language_code, "ja-JP");
    }

    #[test]
    fn longest_entry_wins() {
        let dict = PronunciationDictionary::from_pairs([
            ("GPU", "ジーピーユー"),
            ("GPU cluster", "ジーピーユークラスター"),
        ]);
        assert_eq!(
            dict.apply("The GPU cluster has one GPU."),
            "The ジーピーユークラスター has one ジーピーユー."
        );
    }

    #[test]
    fn replacements_are_not_rescanned() {
        let dict = PronunciationDictionary::from_pairs([("a", "ab"), ("b", "c")]);
        assert_eq!(dict.apply("ab"), "abc");
    }

    #[test]
    fn loads_from_toml() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("dict.toml");
        fs::write(&path, "AWS = \"エーダブリューエス\"\n\"k8s\" = \"クバネティス\"\n").unwrap();
        let dict = PronunciationDictionary::load(&path).unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.apply("k8s on AWS"), "クバネティス on エーダブリューエス");
    }
}
