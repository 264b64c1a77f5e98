//! Intent recognition: ordered regex rules first, LLM classification as the
//! fallback for utterances the rules cannot shape (song titles, artist
//! names), and chat as the final default.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::services::LlmService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    PlayStory,
    PlayStoryCategory,
    PlayStoryByName,
    PlayMusic,
    PlayMusicCategory,
    PlayMusicByName,
    PlayMusicByArtist,
    ControlPause,
    ControlResume,
    ControlStop,
    ControlNext,
    ControlPrevious,
    ControlVolumeUp,
    ControlVolumeDown,
    ControlPlayMode,
    EnglishLearn,
    EnglishWord,
    EnglishFollow,
    Chat,
    DeleteContent,
    SystemTime,
    SystemWeather,
    Unknown,
}

impl Intent {
    /// Tag used by the LLM classification protocol.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "play_story" => Self::PlayStory,
            "play_story_category" => Self::PlayStoryCategory,
            "play_story_by_name" => Self::PlayStoryByName,
            "play_music" => Self::PlayMusic,
            "play_music_category" => Self::PlayMusicCategory,
            "play_music_by_name" => Self::PlayMusicByName,
            "play_music_by_artist" => Self::PlayMusicByArtist,
            "control_pause" => Self::ControlPause,
            "control_resume" => Self::ControlResume,
            "control_stop" => Self::ControlStop,
            "control_next" => Self::ControlNext,
            "control_previous" => Self::ControlPrevious,
            "control_volume_up" => Self::ControlVolumeUp,
            "control_volume_down" => Self::ControlVolumeDown,
            "control_play_mode" => Self::ControlPlayMode,
            "english_learn" => Self::EnglishLearn,
            "english_word" => Self::EnglishWord,
            "english_follow" => Self::EnglishFollow,
            "chat" => Self::Chat,
            "delete_content" => Self::DeleteContent,
            "system_time" => Self::SystemTime,
            "system_weather" => Self::SystemWeather,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NluResult {
    pub intent: Intent,
    pub slots: HashMap<String, String>,
    pub confidence: f64,
    pub raw_text: String,
}

impl NluResult {
    pub fn slot(&self, name: &str) -> Option<&str> {
        self.slots.get(name).map(String::as_str)
    }

    fn chat(text: &str) -> Self {
        Self {
            intent: Intent::Chat,
            slots: HashMap::new(),
            confidence: 0.5,
            raw_text: text.to_string(),
        }
    }
}

#[async_trait]
pub trait NluService: Send + Sync {
    async fn recognize(&self, text: &str) -> NluResult;
}

struct Rule {
    pattern: Regex,
    intent: Intent,
    /// slot name → capture group index
    slots: &'static [(&'static str, usize)],
}

/// Category labels as spoken → catalog category keys.
fn category_key(label: &str) -> &str {
    match label {
        "睡前" => "bedtime",
        "童话" => "fairy_tale",
        "寓言" => "fable",
        "科普" => "science",
        "成语" => "idiom",
        "历史" => "history",
        "神话" => "myth",
        "儿歌" => "nursery_rhyme",
        "摇篮曲" => "lullaby",
        "胎教音乐" | "胎教" => "prenatal",
        "古典音乐" | "古典" => "classical",
        "流行" => "pop",
        "英文歌" => "english",
        other => other,
    }
}

pub struct RuleNlu {
    rules: Vec<Rule>,
    llm: Option<Arc<dyn LlmService>>,
}

impl RuleNlu {
    pub fn new(llm: Option<Arc<dyn LlmService>>) -> Self {
        let rule = |pattern: &str, intent: Intent, slots: &'static [(&'static str, usize)]| Rule {
            pattern: Regex::new(pattern).expect("static rule pattern"),
            intent,
            slots,
        };

        // Rules cover the phrasings regex can extract reliably; anything
        // with free-form names falls through to the LLM.
        let rules = vec![
            rule(
                r"(播放|来点?|讲)(睡前|童话|寓言|科普|成语|历史|神话)故事",
                Intent::PlayStoryCategory,
                &[("category", 2)],
            ),
            rule(r"(讲|说|播放|来)(一?(个|首)|点)?故事$", Intent::PlayStory, &[]),
            rule(
                r"(播放|放|来点?)(儿歌|摇篮曲|胎教音乐|胎教|古典音乐|古典|流行|英文歌)",
                Intent::PlayMusicCategory,
                &[("category", 2)],
            ),
            rule(r"(播放|放|来)(一?首|点)?音乐$", Intent::PlayMusic, &[]),
            rule(r"(播放|放|来)(一?首|点)?歌$", Intent::PlayMusic, &[]),
            rule(r"^(暂停|停一?下|停止播放)$", Intent::ControlPause, &[]),
            rule(r"^(继续|继续播放)$", Intent::ControlResume, &[]),
            rule(r"^(停止|停|关闭|别放了)$", Intent::ControlStop, &[]),
            rule(
                r"(下一个|下一首|切歌|换一个|换一首)",
                Intent::ControlNext,
                &[],
            ),
            rule(r"(上一个|上一首)", Intent::ControlPrevious, &[]),
            rule(
                r"(大声一?点|音量大一点|声音大一点|调大|大点声)",
                Intent::ControlVolumeUp,
                &[],
            ),
            rule(
                r"(小声一?点|音量小一点|声音小一点|调小|小点声)",
                Intent::ControlVolumeDown,
                &[],
            ),
            rule(
                r"(单曲循环|列表循环|随机播放|顺序播放)",
                Intent::ControlPlayMode,
                &[("play_mode", 1)],
            ),
            rule(
                r"(学英语|英语学习|学习英语|教我英语)",
                Intent::EnglishLearn,
                &[],
            ),
            rule(
                r"(.+)(用英语|英文)(怎么说|怎么读)",
                Intent::EnglishWord,
                &[("word", 1)],
            ),
            rule(r"(英语|英文)怎么说(.+)", Intent::EnglishWord, &[("word", 2)]),
            rule(r"(跟我读|跟读)(.+)", Intent::EnglishFollow, &[("word", 2)]),
            rule(r"(.+)(英语|英文)怎么读", Intent::EnglishWord, &[("word", 1)]),
            rule(
                r"(删除|删掉|移除)(.+)",
                Intent::DeleteContent,
                &[("content_name", 2)],
            ),
            rule(r"(现在)?几点(了|钟)?", Intent::SystemTime, &[]),
            rule(r"(什么)?时间", Intent::SystemTime, &[]),
            rule(r"(今天)?(周几|星期几)", Intent::SystemTime, &[]),
            rule(
                r"(今天|明天|后天)?.{0,2}(天气|气温|温度)",
                Intent::SystemWeather,
                &[],
            ),
            rule(r"(外面|今天)(冷|热|下雨|下雪)吗", Intent::SystemWeather, &[]),
            rule(
                r"(要不要|需不需要)(带伞|穿外套)",
                Intent::SystemWeather,
                &[],
            ),
        ];

        Self { rules, llm }
    }

    fn rule_match(&self, text: &str) -> Option<NluResult> {
        for rule in &self.rules {
            let Some(captures) = rule.pattern.captures(text) else {
                continue;
            };

            let mut slots = HashMap::new();
            for (name, group) in rule.slots {
                if let Some(value) = captures.get(*group) {
                    let value = value.as_str().trim();
                    if !value.is_empty() {
                        slots.insert(name.to_string(), value.to_string());
                    }
                }
            }
            if let Some(category) = slots.get_mut("category") {
                *category = category_key(category).to_string();
            }

            return Some(NluResult {
                intent: rule.intent,
                slots,
                confidence: 0.9,
                raw_text: text.to_string(),
            });
        }
        None
    }

    async fn llm_classify(&self, text: &str) -> Option<NluResult> {
        let llm = self.llm.as_ref()?;

        let prompt = format!(
            "你是一个意图分类器。分析用户输入，返回JSON格式结果。\n\
             用户输入: \"{text}\"\n\
             可选意图: play_story, play_story_by_name(提取story_name), play_music, \
             play_music_by_artist(提取artist_name), play_music_by_name(提取music_name,可选artist_name), \
             play_music_category(提取category), control_pause, control_resume, control_stop, \
             control_next, control_previous, control_volume_up, control_volume_down, \
             control_play_mode, english_learn, english_word(提取word), english_follow, \
             delete_content(提取content_name), system_time, system_weather, chat\n\
             请只返回JSON，格式: {{\"intent\":\"意图名\",\"slots\":{{\"key\":\"value\"}}}}"
        );

        let response = match llm
            .complete(
                &prompt,
                "你是一个精确的意图分类和实体提取系统。只返回JSON，不要返回任何其他内容。",
            )
            .await
        {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(%error, "LLM intent classification failed");
                return None;
            }
        };

        #[derive(Deserialize)]
        struct Classified {
            intent: String,
            #[serde(default)]
            slots: HashMap<String, String>,
        }

        // Models occasionally wrap the JSON in prose; take the outermost
        // object.
        let start = response.find('{')?;
        let end = response.rfind('}')?;
        let classified: Classified = serde_json::from_str(&response[start..=end]).ok()?;

        let intent = Intent::from_tag(&classified.intent);
        if intent == Intent::Unknown {
            return None;
        }
        Some(NluResult {
            intent,
            slots: classified.slots,
            confidence: 0.8,
            raw_text: text.to_string(),
        })
    }
}

#[async_trait]
impl NluService for RuleNlu {
    #[tracing::instrument(skip(self))]
    async fn recognize(&self, text: &str) -> NluResult {
        let text = text.trim();
        if text.is_empty() {
            return NluResult {
                intent: Intent::Unknown,
                slots: HashMap::new(),
                confidence: 0.0,
                raw_text: String::new(),
            };
        }

        if let Some(result) = self.rule_match(text) {
            tracing::debug!(intent = ?result.intent, "rule match");
            return result;
        }

        if let Some(result) = self.llm_classify(text).await {
            tracing::debug!(intent = ?result.intent, "LLM classification");
            return result;
        }

        NluResult::chat(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nlu() -> RuleNlu {
        RuleNlu::new(None)
    }

    #[tokio::test]
    async fn control_intents_match() {
        let nlu = nlu();
        assert_eq!(nlu.recognize("下一首").await.intent, Intent::ControlNext);
        assert_eq!(nlu.recognize("上一首").await.intent, Intent::ControlPrevious);
        assert_eq!(nlu.recognize("暂停").await.intent, Intent::ControlPause);
        assert_eq!(nlu.recognize("继续播放").await.intent, Intent::ControlResume);
        assert_eq!(
            nlu.recognize("大声一点").await.intent,
            Intent::ControlVolumeUp
        );
        assert_eq!(
            nlu.recognize("小声一点").await.intent,
            Intent::ControlVolumeDown
        );
    }

    #[tokio::test]
    async fn play_mode_extracts_the_mode_slot() {
        let nlu = nlu();
        let result = nlu.recognize("切换到单曲循环").await;
        assert_eq!(result.intent, Intent::ControlPlayMode);
        assert_eq!(result.slot("play_mode"), Some("单曲循环"));
    }

    #[tokio::test]
    async fn music_and_story_rules_match() {
        let nlu = nlu();
        assert_eq!(nlu.recognize("播放音乐").await.intent, Intent::PlayMusic);
        assert_eq!(nlu.recognize("讲个故事").await.intent, Intent::PlayStory);

        let category = nlu.recognize("来点儿歌").await;
        assert_eq!(category.intent, Intent::PlayMusicCategory);
        assert_eq!(category.slot("category"), Some("nursery_rhyme"));

        let story = nlu.recognize("讲睡前故事").await;
        assert_eq!(story.intent, Intent::PlayStoryCategory);
        assert_eq!(story.slot("category"), Some("bedtime"));
    }

    #[tokio::test]
    async fn delete_extracts_the_content_name() {
        let result = nlu().recognize("删除小星星").await;
        assert_eq!(result.intent, Intent::DeleteContent);
        assert_eq!(result.slot("content_name"), Some("小星星"));
    }

    #[tokio::test]
    async fn unmatched_text_defaults_to_chat() {
        let result = nlu().recognize("今天心情真好呀").await;
        assert_eq!(result.intent, Intent::Chat);
        assert!(result.confidence < 0.8);
    }

    #[tokio::test]
    async fn empty_input_is_unknown() {
        assert_eq!(nlu().recognize("  ").await.intent, Intent::Unknown);
    }
}
