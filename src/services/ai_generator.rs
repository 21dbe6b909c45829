use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::Language;
use crate::services::rate_limit_ledger::RateLimitLedger;

/// Default per-provider rpm/rpd quotas (spec §4.3), applied to every key
/// registered for that provider.
const OPENROUTER_RPM: u32 = 20;
const OPENROUTER_RPD: u32 = 50;
const GROQ_RPM: u32 = 30;
const GROQ_RPD: u32 = 1000;
const OPENAI_RPM: u32 = 60;
const OPENAI_RPD: u32 = 200;

const TOPICS: &[&str] = &[
    "tech news and innovations",
    "productivity tips",
    "industry insights",
    "business strategies",
    "personal development",
    "health and wellness",
    "travel experiences",
    "book recommendations",
    "movie and entertainment",
    "cooking and recipes",
    "photography tips",
    "marketing trends",
    "startup advice",
    "remote work practices",
    "sustainable living",
];

const TOPICS_IT: &[&str] = &[
    "novità tecnologiche",
    "consigli di produttività",
    "spunti di settore",
    "strategie aziendali",
    "crescita personale",
    "salute e benessere",
    "esperienze di viaggio",
    "consigli di lettura",
    "cinema e intrattenimento",
    "ricette e cucina",
];

const TONES: &[&str] = &[
    "friendly and casual",
    "professional and informative",
    "enthusiastic and energetic",
    "thoughtful and reflective",
    "humorous and light-hearted",
];

/// A piece of generated email content plus the provenance used to fill
/// `Email::ai_prompt`/`ai_model` (spec §4.5 / C5).
#[derive(Debug, Clone)]
pub struct GeneratedEmail {
    pub subject: String,
    pub body: String,
    pub prompt: String,
    pub model: String,
}

#[derive(Debug, Clone)]
struct ProviderConfig {
    label: String,
    key_id: String,
    api_key: String,
    base_url: String,
    model: String,
    rpm_limit: u32,
    rpd_limit: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

const SYSTEM_PROMPT: &str = "You are a helpful assistant that writes natural, conversational \
emails. Keep emails concise (100-250 words), friendly, and authentic. Avoid being overly formal \
or salesy.";

/// Generates warmup email content, trying each configured provider in
/// order before falling back to local templates (spec §4.5). Mirrors the
/// provider key-ring and template-fallback shape of the Python reference,
/// translated into the teacher's "call remote API, degrade gracefully"
/// idiom from its reply classifier.
pub struct AiGenerator {
    client: Client,
    providers: Vec<ProviderConfig>,
    ledger: Arc<RateLimitLedger>,
}

impl AiGenerator {
    pub fn new(
        openrouter_keys: &[String],
        groq_keys: &[String],
        openai_key: Option<&str>,
        ledger: Arc<RateLimitLedger>,
    ) -> Self {
        let mut providers = Vec::new();
        for (i, key) in openrouter_keys.iter().enumerate() {
            providers.push(ProviderConfig {
                label: "openrouter".to_string(),
                key_id: format!("openrouter_{i}"),
                api_key: key.clone(),
                base_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
                model: "meta-llama/llama-3.1-8b-instruct:free".to_string(),
                rpm_limit: OPENROUTER_RPM,
                rpd_limit: OPENROUTER_RPD,
            });
        }
        for (i, key) in groq_keys.iter().enumerate() {
            providers.push(ProviderConfig {
                label: "groq".to_string(),
                key_id: format!("groq_{i}"),
                api_key: key.clone(),
                base_url: "https://api.groq.com/openai/v1/chat/completions".to_string(),
                model: "llama-3.1-8b-instant".to_string(),
                rpm_limit: GROQ_RPM,
                rpd_limit: GROQ_RPD,
            });
        }
        if let Some(key) = openai_key {
            providers.push(ProviderConfig {
                label: "openai".to_string(),
                key_id: "openai_0".to_string(),
                api_key: key.to_string(),
                base_url: "https://api.openai.com/v1/chat/completions".to_string(),
                model: "gpt-4o-mini".to_string(),
                rpm_limit: OPENAI_RPM,
                rpd_limit: OPENAI_RPD,
            });
        }

        Self {
            client: Client::new(),
            providers,
            ledger,
        }
    }

    pub async fn generate_initial(&self, context: Option<&str>, sender_name: Option<&str>, language: Language) -> GeneratedEmail {
        let prompt = build_initial_prompt(context, sender_name, language);
        self.generate(&prompt, language, false, sender_name).await
    }

    pub async fn generate_reply(
        &self,
        original_subject: &str,
        original_body: &str,
        sender_name: Option<&str>,
        language: Language,
    ) -> GeneratedEmail {
        let previous = format!("Subject: {original_subject}\n\n{original_body}");
        let prompt = build_reply_prompt(&previous, sender_name, language);
        self.generate(&prompt, language, true, sender_name).await
    }

    pub async fn generate_batch(&self, count: usize, sender_name: Option<&str>, language: Language) -> Vec<GeneratedEmail> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.generate_initial(None, sender_name, language).await);
        }
        out
    }

    async fn generate(&self, prompt: &str, language: Language, is_reply: bool, sender_name: Option<&str>) -> GeneratedEmail {
        if self.providers.is_empty() {
            tracing::warn!("no AI providers configured, using local fallback");
            return fallback_email(is_reply, sender_name, language, prompt);
        }

        for provider in &self.providers {
            let (allowed, reason) = self.ledger.can_use(&provider.key_id, provider.rpm_limit, provider.rpd_limit).await;
            if !allowed {
                tracing::warn!(provider = %provider.label, key_id = %provider.key_id, reason = %reason, "rate limit reached, trying next key");
                continue;
            }

            match self.call_provider(provider, prompt).await {
                Ok(content) => {
                    self.ledger.try_record(&provider.key_id, provider.rpm_limit, provider.rpd_limit).await;
                    let (subject, body) = parse_email_content(&content);
                    return GeneratedEmail {
                        subject,
                        body,
                        prompt: prompt.to_string(),
                        model: provider.model.clone(),
                    };
                }
                Err(e) => {
                    tracing::warn!(provider = %provider.label, error = %e, "AI generation failed, trying next provider");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }

        tracing::warn!("all AI providers exhausted, using local fallback");
        fallback_email(is_reply, sender_name, language, prompt)
    }

    async fn call_provider(&self, provider: &ProviderConfig, prompt: &str) -> Result<String, String> {
        let request = ChatRequest {
            model: provider.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt.to_string(),
                },
            ],
            temperature: 0.8,
            max_tokens: 500,
        };

        let response = self
            .client
            .post(&provider.base_url)
            .bearer_auth(&provider.api_key)
            .json(&request)
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("{status}: {body}"));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| format!("invalid response: {e}"))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| "empty response".to_string())
    }
}

fn build_initial_prompt(context: Option<&str>, sender_name: Option<&str>, language: Language) -> String {
    let mut rng = rand::thread_rng();
    let topics = if language == Language::It { TOPICS_IT } else { TOPICS };
    let topic = context.map(str::to_string).unwrap_or_else(|| topics.choose(&mut rng).unwrap().to_string());
    let tone = TONES.choose(&mut rng).unwrap();
    let length = ["short (100-150 words)", "medium (150-200 words)"].choose(&mut rng).unwrap();
    let signature = match sender_name {
        Some(name) => format!("Sign the email with '{name}' at the end."),
        None => "End with a generic closing like 'Best regards' or similar.".to_string(),
    };

    let lang_instruction = if language == Language::It {
        "Write the entire email in Italian. "
    } else {
        ""
    };

    format!(
        "{lang_instruction}Write a {tone} email about {topic}. The email should be {length}. \
         Start with a natural greeting and end with a friendly closing. {signature} \
         Format: First line should be 'Subject: [subject line]', then a blank line, then the \
         email body. Make it feel like a real person wrote it, not a marketing email."
    )
}

fn build_reply_prompt(previous_content: &str, sender_name: Option<&str>, language: Language) -> String {
    let mut rng = rand::thread_rng();
    let tone = TONES.choose(&mut rng).unwrap();
    let signature = match sender_name {
        Some(name) => format!("Sign the reply with '{name}' at the end."),
        None => "End with a generic closing like 'Best regards' or similar.".to_string(),
    };
    let lang_instruction = if language == Language::It {
        "Write the entire reply in Italian. "
    } else {
        ""
    };

    format!(
        "{lang_instruction}Write a {tone} reply to this email:\n\n{previous_content}\n\n\
         Keep the reply concise (100-200 words). Acknowledge what they said and continue the \
         conversation naturally. {signature} Format: First line should be 'Subject: Re: [original \
         subject]', then a blank line, then the reply body. Make it conversational and authentic."
    )
}

fn parse_email_content(content: &str) -> (String, String) {
    let lines: Vec<&str> = content.trim().lines().collect();
    let mut subject = "Hello!".to_string();
    let mut body_start = 0;

    for (i, line) in lines.iter().enumerate() {
        if line.to_lowercase().starts_with("subject:") {
            subject = line.splitn(2, ':').nth(1).unwrap_or("").trim().to_string();
            body_start = i + 1;
            break;
        }
    }

    let mut body_lines: Vec<&str> = Vec::new();
    for line in &lines[body_start.min(lines.len())..] {
        if !line.trim().is_empty() || !body_lines.is_empty() {
            body_lines.push(line);
        }
    }

    let mut body = body_lines.join("\n").trim().to_string();
    if body.is_empty() {
        body = content.trim().to_string();
    }

    (subject, body)
}

fn fallback_email(is_reply: bool, sender_name: Option<&str>, language: Language, prompt: &str) -> GeneratedEmail {
    let signature = sender_name.unwrap_or("Best regards").to_string();
    let mut rng = rand::thread_rng();

    let (subject, body) = if is_reply {
        if language == Language::It {
            fallback_reply_it(&signature, &mut rng)
        } else {
            fallback_reply_en(&signature, &mut rng)
        }
    } else if language == Language::It {
        fallback_initial_it(&signature, &mut rng)
    } else {
        fallback_initial_en(&signature, &mut rng)
    };

    GeneratedEmail {
        subject,
        body,
        prompt: prompt.to_string(),
        model: "local_template".to_string(),
    }
}

fn fallback_initial_en(signature: &str, rng: &mut impl Rng) -> (String, String) {
    const GREETINGS: &[&str] = &["Hi there", "Hey", "Hello", "Hi", "Good morning"];
    const OPENINGS: &[&str] = &[
        "I've been thinking about {topic}",
        "I came across something interesting about {topic}",
        "I wanted to share a quick thought on {topic}",
        "Recently, I've been exploring {topic}",
    ];
    const MIDDLES: &[&str] = &[
        "and I thought you might find it interesting too.",
        "and I'd love to hear your perspective on it.",
        "and it reminded me of our previous discussions.",
    ];
    const CLOSINGS: &[&str] = &[
        "Let me know what you think when you have a moment.",
        "Would love to hear your thoughts on this.",
        "Looking forward to your take on this.",
    ];

    let topic = TOPICS.choose(rng).unwrap();
    let greeting = GREETINGS.choose(rng).unwrap();
    let opening = OPENINGS.choose(rng).unwrap().replace("{topic}", topic);
    let middle = MIDDLES.choose(rng).unwrap();
    let closing = CLOSINGS.choose(rng).unwrap();

    let subject_templates = [
        format!("Quick thought on {topic}"),
        format!("Thoughts on {topic}"),
        format!("Something interesting about {topic}"),
    ];
    let subject = subject_templates.choose(rng).unwrap().clone();
    let body = format!("{greeting},\n\n{opening} {middle}\n\n{closing}\n\n{signature}");
    (subject, body)
}

fn fallback_initial_it(signature: &str, rng: &mut impl Rng) -> (String, String) {
    const GREETINGS: &[&str] = &["Ciao", "Buongiorno", "Salve"];
    let topic = TOPICS_IT.choose(rng).unwrap();
    let greeting = GREETINGS.choose(rng).unwrap();

    let subject = format!("Due parole su {topic}");
    let body = format!(
        "{greeting},\n\nVolevo condividere un pensiero veloce su {topic}, penso possa interessarti.\n\n\
         Fammi sapere cosa ne pensi quando hai un momento.\n\n{signature}"
    );
    (subject, body)
}

fn fallback_reply_en(signature: &str, rng: &mut impl Rng) -> (String, String) {
    const ACKS: &[&str] = &["Thanks for reaching out!", "Great to hear from you!", "Thanks for your email!"];
    const RESPONSES: &[&str] = &[
        "That's a really interesting point.",
        "I completely agree with what you're saying.",
        "That's something I've been thinking about too.",
    ];
    const CLOSINGS: &[&str] = &["Let me know what you think when you have a moment.", "Looking forward to your take on this."];

    let ack = ACKS.choose(rng).unwrap();
    let response = RESPONSES.choose(rng).unwrap();
    let closing = CLOSINGS.choose(rng).unwrap();

    let subject = "Re: Thanks for reaching out".to_string();
    let body = format!("{ack}\n\n{response}\n\n{closing}\n\n{signature}");
    (subject, body)
}

fn fallback_reply_it(signature: &str, rng: &mut impl Rng) -> (String, String) {
    const ACKS: &[&str] = &["Grazie per avermi scritto!", "Che piacere sentirti!"];
    const RESPONSES: &[&str] = &["È un punto di vista interessante.", "Sono pienamente d'accordo."];

    let ack = ACKS.choose(rng).unwrap();
    let response = RESPONSES.choose(rng).unwrap();

    let subject = "Re: grazie per avermi scritto".to_string();
    let body = format!("{ack}\n\n{response}\n\nRestiamo in contatto.\n\n{signature}");
    (subject, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subject_and_body() {
        let content = "Subject: Hello world\n\nThis is the body.\nSecond line.";
        let (subject, body) = parse_email_content(content);
        assert_eq!(subject, "Hello world");
        assert_eq!(body, "This is the body.\nSecond line.");
    }

    #[test]
    fn falls_back_to_whole_content_without_subject_line() {
        let content = "Just a plain message with no subject marker.";
        let (subject, body) = parse_email_content(content);
        assert_eq!(subject, "Hello!");
        assert_eq!(body, content);
    }

    #[tokio::test]
    async fn generates_fallback_when_no_providers_configured() {
        let generator = AiGenerator::new(&[], &[], None, Arc::new(RateLimitLedger::new()));
        let email = generator.generate_initial(None, Some("Alex"), Language::En).await;
        assert_eq!(email.model, "local_template");
        assert!(email.body.contains("Alex"));
    }

    #[tokio::test]
    async fn generates_italian_fallback() {
        let generator = AiGenerator::new(&[], &[], None, Arc::new(RateLimitLedger::new()));
        let email = generator.generate_initial(None, None, Language::It).await;
        assert_eq!(email.model, "local_template");
    }
}
