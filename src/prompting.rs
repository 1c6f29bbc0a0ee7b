use minijinja::{context, Environment, Value};

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system_prompt.j2");
const REPLY_STYLE_TEMPLATE: &str = include_str!("prompts/reply_style.j2");
const PRICE_QUOTE_TEMPLATE: &str = include_str!("prompts/price_quote.j2");

pub struct SystemPromptContext<'a> {
    pub business_name: &'a str,
    pub offerings: &'a [String],
    pub attachment_reply: &'a str,
}

pub struct PriceQuoteContext<'a> {
    pub product_type: &'a str,
    pub size: &'a str,
    pub price: f64,
}

fn render_template(name: &str, source: &str, ctx: Value) -> Option<String> {
    let mut env = Environment::new();
    env.add_template(name, source).ok()?;
    env.get_template(name).ok()?.render(ctx).ok()
}

pub fn render_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    render_template(
        "system_prompt",
        SYSTEM_PROMPT_TEMPLATE,
        context! {
            business_name => ctx.business_name.trim(),
            offerings => ctx.offerings,
            attachment_reply => ctx.attachment_reply,
        },
    )
    .unwrap_or_else(|| fallback_system_prompt(ctx))
}

fn fallback_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    let mut prompt = format!(
        "You are a customer support assistant for \"{}\".\n\
         Reply in the user's language, politely, in 1-2 short lines. Never guess prices.\n",
        ctx.business_name.trim()
    );
    for line in ctx.offerings {
        prompt.push_str("- ");
        prompt.push_str(line);
        prompt.push('\n');
    }
    prompt
}

pub fn render_reply_style(max_lines: &str) -> String {
    render_template(
        "reply_style",
        REPLY_STYLE_TEMPLATE,
        context! { max_lines => max_lines },
    )
    .unwrap_or_else(|| format!("Keep reply within {max_lines} short, complete lines."))
}

/// Price is pre-formatted so whole amounts read `1200`, not `1200.0`.
pub fn render_price_quote(ctx: &PriceQuoteContext<'_>) -> String {
    let price = format_price(ctx.price);
    render_template(
        "price_quote",
        PRICE_QUOTE_TEMPLATE,
        context! {
            price => price.as_str(),
            product_type => ctx.product_type,
            size => ctx.size,
        },
    )
    .unwrap_or_else(|| format!("{} {}: {price}", ctx.product_type, ctx.size))
}

pub fn format_price(price: f64) -> String {
    format!("{price}")
}
