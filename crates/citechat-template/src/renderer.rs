//! Template rendering with minijinja

use citechat_core::{ChatError, Result};
use minijinja::Environment;
use serde::Serialize;

/// Template renderer using minijinja
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        Self { env }
    }

    /// Render a template string against any serializable context
    pub fn render<S: Serialize>(&self, template: &str, context: S) -> Result<String> {
        let tmpl = self
            .env
            .template_from_str(template)
            .map_err(|e| ChatError::TemplateError(format!("Failed to parse template: {}", e)))?;

        tmpl.render(context)
            .map_err(|e| ChatError::TemplateError(format!("Failed to render template: {}", e)))
    }

    /// Parse without rendering, for validating user-edited templates
    pub fn validate(&self, template: &str) -> Result<()> {
        self.env
            .template_from_str(template)
            .map(|_| ())
            .map_err(|e| ChatError::TemplateError(format!("Failed to parse template: {}", e)))
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TemplateRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRenderer").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;
    use std::collections::HashMap;

    #[test]
    fn test_render_simple() {
        let renderer = TemplateRenderer::new();
        let mut vars = HashMap::new();
        vars.insert("name", "Smith2020");

        let result = renderer.render("Entry: {{ name }}", &vars).unwrap();
        assert_eq!(result, "Entry: Smith2020");
    }

    #[test]
    fn test_render_loop() {
        let renderer = TemplateRenderer::new();
        let result = renderer
            .render(
                "{% for key in keys %}[{{ key }}]{% endfor %}",
                context! { keys => vec!["a", "b"] },
            )
            .unwrap();
        assert_eq!(result, "[a][b]");
    }

    #[test]
    fn test_render_with_default_filter() {
        let renderer = TemplateRenderer::new();
        let result = renderer
            .render("{{ name | default('unknown') }}", context! {})
            .unwrap();
        assert_eq!(result, "unknown");
    }

    #[test]
    fn test_invalid_template() {
        let renderer = TemplateRenderer::new();
        assert!(matches!(
            renderer.render("{% for %}", context! {}),
            Err(ChatError::TemplateError(_))
        ));
        assert!(renderer.validate("{{ ok }}").is_ok());
        assert!(renderer.validate("{{ broken").is_err());
    }
}
