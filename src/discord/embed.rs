use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscordEmbed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub color: Option<u32>,
    pub timestamp: Option<String>,
    pub footer_text: Option<String>,
    pub image_url: Option<String>,
}

impl DiscordEmbed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    pub fn timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn footer_text(mut self, text: impl Into<String>) -> Self {
        self.footer_text = Some(text.into());
        self
    }

    pub fn image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn to_json(&self) -> Value {
        let mut embed = serde_json::Map::new();

        if let Some(ref title) = self.title {
            embed.insert("title".to_string(), Value::String(title.clone()));
        }

        if let Some(ref description) = self.description {
            embed.insert(
                "description".to_string(),
                Value::String(description.clone()),
            );
        }

        if let Some(ref url) = self.url {
            embed.insert("url".to_string(), Value::String(url.clone()));
        }

        if let Some(color) = self.color {
            embed.insert("color".to_string(), Value::Number(color.into()));
        }

        if let Some(ref timestamp) = self.timestamp {
            embed.insert("timestamp".to_string(), Value::String(timestamp.clone()));
        }

        if let Some(ref text) = self.footer_text {
            let mut footer = serde_json::Map::new();
            footer.insert("text".to_string(), Value::String(text.clone()));
            embed.insert("footer".to_string(), Value::Object(footer));
        }

        if let Some(ref image_url) = self.image_url {
            let mut image = serde_json::Map::new();
            image.insert("url".to_string(), Value::String(image_url.clone()));
            embed.insert("image".to_string(), Value::Object(image));
        }

        Value::Object(embed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_to_json_includes_title_and_url() {
        let embed = DiscordEmbed::new()
            .title("The Page")
            .url("https://www.facebook.com/123/posts/456");

        let json = embed.to_json();
        assert_eq!(json["title"], "The Page");
        assert_eq!(json["url"], "https://www.facebook.com/123/posts/456");
    }

    #[test]
    fn embed_to_json_nests_footer_and_image() {
        let embed = DiscordEmbed::new()
            .footer_text("Relayed from Facebook")
            .image("https://scontent.example/p.jpg");

        let json = embed.to_json();
        assert_eq!(json["footer"]["text"], "Relayed from Facebook");
        assert_eq!(json["image"]["url"], "https://scontent.example/p.jpg");
    }

    #[test]
    fn embed_to_json_omits_unset_fields() {
        let json = DiscordEmbed::new().title("only a title").to_json();
        assert!(json.get("description").is_none());
        assert!(json.get("image").is_none());
        assert!(json.get("footer").is_none());
    }
}
