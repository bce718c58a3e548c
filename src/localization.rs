use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource, FluentValue};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::warn;
use unic_langid::LanguageIdentifier;

/// Language used when the user's language is unknown or unsupported
pub const DEFAULT_LANGUAGE: &str = "en";

/// Embedded message catalogs, one per supported language
const RESOURCES: [(&str, &str); 2] = [
    ("en", include_str!("../locales/en/main.ftl")),
    ("es", include_str!("../locales/es/main.ftl")),
];

static LOCALIZATION_MANAGER: LazyLock<LocalizationManager> = LazyLock::new(LocalizationManager::new);

/// Localization manager for the bot's own replies
pub struct LocalizationManager {
    bundles: HashMap<String, FluentBundle<FluentResource>>,
}

impl LocalizationManager {
    /// Create a manager with every embedded language loaded
    pub fn new() -> Self {
        let mut bundles = HashMap::new();

        for (language, source) in RESOURCES {
            match Self::create_bundle(language, source) {
                Some(bundle) => {
                    bundles.insert(language.to_string(), bundle);
                }
                None => warn!(language, "Skipping language with invalid identifier"),
            }
        }

        Self { bundles }
    }

    /// Create a fluent bundle for a specific locale
    fn create_bundle(language: &str, source: &str) -> Option<FluentBundle<FluentResource>> {
        let locale: LanguageIdentifier = language.parse().ok()?;
        let mut bundle = FluentBundle::new_concurrent(vec![locale]);
        bundle.set_use_isolating(false);

        let resource = match FluentResource::try_new(source.to_string()) {
            Ok(resource) => resource,
            Err((resource, errors)) => {
                warn!(language, errors = ?errors, "Message catalog has syntax errors");
                resource
            }
        };
        if let Err(errors) = bundle.add_resource(resource) {
            warn!(language, errors = ?errors, "Duplicate messages in catalog");
        }

        Some(bundle)
    }

    /// Whether a catalog exists for `language`
    pub fn supports(&self, language: &str) -> bool {
        self.bundles.contains_key(language)
    }

    /// Map a Telegram language code such as `es-MX` to a loaded language
    pub fn resolve_language<'a>(&self, language_code: Option<&'a str>) -> &'a str {
        language_code
            .and_then(|code| code.split(['-', '_']).next())
            .filter(|primary| self.supports(primary))
            .unwrap_or(DEFAULT_LANGUAGE)
    }

    /// Get a localized message in a specific language
    pub fn get_message_in_language(
        &self,
        key: &str,
        language: &str,
        args: Option<&HashMap<&str, &str>>,
    ) -> String {
        let bundle = match self
            .bundles
            .get(language)
            .or_else(|| self.bundles.get(DEFAULT_LANGUAGE))
        {
            Some(bundle) => bundle,
            None => return format!("Missing translation: {key}"),
        };

        let pattern = match bundle.get_message(key).and_then(|msg| msg.value()) {
            Some(pattern) => pattern,
            None => return format!("Missing translation: {key}"),
        };

        let fluent_args = args.map(|args| {
            args.iter()
                .map(|(k, v)| (*k, FluentValue::from(*v)))
                .collect::<FluentArgs>()
        });

        let mut errors = vec![];
        let value = bundle.format_pattern(pattern, fluent_args.as_ref(), &mut errors);
        if !errors.is_empty() {
            warn!(key, language, errors = ?errors, "Message formatted with errors");
        }
        value.into_owned()
    }
}

impl Default for LocalizationManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Get the global localization manager
pub fn get_localization_manager() -> &'static LocalizationManager {
    &LOCALIZATION_MANAGER
}

/// Localized message for the user's Telegram language code
pub fn t_lang(key: &str, language_code: Option<&str>) -> String {
    let manager = get_localization_manager();
    manager.get_message_in_language(key, manager.resolve_language(language_code), None)
}

/// Localized message with arguments for the user's Telegram language code
pub fn t_args_lang(key: &str, args: &[(&str, &str)], language_code: Option<&str>) -> String {
    let manager = get_localization_manager();
    let args: HashMap<&str, &str> = args.iter().copied().collect();
    manager.get_message_in_language(key, manager.resolve_language(language_code), Some(&args))
}
