//! Canned bot responder: an ordered keyword table scanned against each
//! inbound message.

/// Keyword-driven responder with a fixed fallback reply.
///
/// Matching is case-insensitive and substring-based; when several
/// keywords occur in one message, table order decides the winner, not
/// the order they appear in the input.
#[derive(Debug)]
pub struct BotResponder {
    entries: Vec<(&'static str, &'static str)>,
    default_reply: &'static str,
}

impl BotResponder {
    /// Creates the responder with the product's canned table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            // Keywords must be lowercase; order is the tie-break.
            entries: vec![
                ("oi", "Olá! Como posso ajudar você hoje?"),
                (
                    "ajuda",
                    "Claro! Você pode gerenciar contatos, acessar relatórios (se for admin) ou conversar aqui. O que precisa?",
                ),
                (
                    "contato",
                    "Para gerenciar contatos, volte à página principal e use a seção \"Seus Contatos\". Quer ajuda com algo específico?",
                ),
                (
                    "admin",
                    "Se precisar de um administrador, continue enviando mensagens. Após 5 respostas automáticas, um admin será notificado!",
                ),
                (
                    "relatório",
                    "Relatórios estão disponíveis para administradores na seção \"Relatórios\" da agenda. Quer saber mais?",
                ),
            ],
            default_reply:
                "Desculpe, não entendi. Tente palavras como \"ajuda\", \"contato\" ou \"admin\".",
        }
    }

    /// Returns the reply for the first table keyword contained in
    /// `message`, or the default reply when none matches.
    #[must_use]
    pub fn reply_to(&self, message: &str) -> &str {
        let lowered = message.to_lowercase();
        self.entries
            .iter()
            .find(|(keyword, _)| lowered.contains(keyword))
            .map_or(self.default_reply, |(_, reply)| *reply)
    }
}

impl Default for BotResponder {
    fn default() -> Self {
        Self::new()
    }
}
