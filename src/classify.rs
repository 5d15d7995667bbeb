use rand::seq::SliceRandom;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use tracing::warn;

/// Declarative source of a classification rule, as shipped in the built-in
/// table or loaded from JSON at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    pub category: String,
    pub patterns: Vec<String>,
    pub replies: Vec<String>,
    #[serde(default)]
    pub requires_human: bool,
}

/// A compiled rule: a named category with match patterns, candidate replies
/// and the escalation flag.
struct ClassificationRule {
    category: String,
    patterns: Vec<Regex>,
    replies: Vec<String>,
    requires_human: bool,
}

/// What the chain decided for one inbound user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotDecision {
    /// A scripted reply from a matching rule. `requires_human` asks the
    /// caller to schedule escalation after its fixed delay.
    Reply {
        category: String,
        text: String,
        requires_human: bool,
    },
    /// A generated contextual reply; never escalates by itself.
    Contextual { topic: String, text: String },
    /// Nothing produced a response; connect the user to a human now.
    Escalate,
}

struct TopicDetector {
    topic: &'static str,
    keywords: &'static [&'static str],
    reply: &'static str,
}

/// The ordered responder chain for sessions with no assigned agent:
/// rule match → contextual fallback → default escalation.
pub struct Classifier {
    rules: Vec<ClassificationRule>,
    topics: Vec<TopicDetector>,
}

impl Classifier {
    /// Compile a rule table. Patterns are case-insensitive regexes applied
    /// to the normalized (trimmed, lowercased) message text.
    pub fn from_rules(specs: Vec<RuleSpec>) -> Result<Self, regex::Error> {
        let mut rules = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut patterns = Vec::with_capacity(spec.patterns.len());
            for pattern in &spec.patterns {
                patterns.push(
                    RegexBuilder::new(pattern)
                        .case_insensitive(true)
                        .build()?,
                );
            }
            rules.push(ClassificationRule {
                category: spec.category,
                patterns,
                replies: spec.replies,
                requires_human: spec.requires_human,
            });
        }
        Ok(Self {
            rules,
            topics: default_topics(),
        })
    }

    /// The shipped Portuguese rule table.
    pub fn builtin() -> Result<Self, regex::Error> {
        Self::from_rules(builtin_rules())
    }

    /// Load a rule table from a JSON document (same shape as [`RuleSpec`]).
    pub fn from_json(doc: &str) -> anyhow::Result<Self> {
        let specs: Vec<RuleSpec> = serde_json::from_str(doc)?;
        Ok(Self::from_rules(specs)?)
    }

    /// Run the chain. First matching rule wins; otherwise the contextual
    /// fallback; otherwise escalation. A failing contextual responder is
    /// treated exactly like "no response" so a classifier fault can never
    /// keep a user away from a human.
    pub fn classify(&self, text: &str) -> BotDecision {
        let normalized = text.trim().to_lowercase();

        for rule in &self.rules {
            if rule.patterns.iter().any(|re| re.is_match(&normalized)) {
                let text = rule
                    .replies
                    .choose(&mut rand::thread_rng())
                    .cloned()
                    .unwrap_or_default();
                return BotDecision::Reply {
                    category: rule.category.clone(),
                    text,
                    requires_human: rule.requires_human,
                };
            }
        }

        match self.contextual(&normalized) {
            Ok(Some((topic, text))) => BotDecision::Contextual {
                topic: topic.to_string(),
                text,
            },
            Ok(None) => BotDecision::Escalate,
            Err(err) => {
                warn!(%err, "contextual responder failed, escalating");
                BotDecision::Escalate
            }
        }
    }

    fn contextual(&self, normalized: &str) -> anyhow::Result<Option<(&'static str, String)>> {
        for detector in &self.topics {
            if detector.keywords.iter().any(|kw| normalized.contains(kw)) {
                return Ok(Some((detector.topic, detector.reply.to_string())));
            }
        }
        Ok(None)
    }
}

fn builtin_rules() -> Vec<RuleSpec> {
    vec![
        RuleSpec {
            category: "greeting".into(),
            patterns: vec![
                r"\bol[aá]\b".into(),
                r"\boi\b".into(),
                r"\bbom dia\b".into(),
                r"\bboa tarde\b".into(),
                r"\bboa noite\b".into(),
            ],
            replies: vec![
                "Olá! Como posso ajudar você hoje?".into(),
                "Oi! Em que posso ajudar?".into(),
                "Olá! Estou aqui para tirar suas dúvidas sobre licitações.".into(),
            ],
            requires_human: false,
        },
        RuleSpec {
            category: "farewell".into(),
            patterns: vec![
                r"\btchau\b".into(),
                r"\bat[eé] logo\b".into(),
                r"\bobrigad[oa]\b".into(),
                r"\bvaleu\b".into(),
            ],
            replies: vec![
                "Obrigado pelo contato! Qualquer dúvida, estamos à disposição.".into(),
                "Até logo! Conte com a gente.".into(),
            ],
            requires_human: false,
        },
        RuleSpec {
            category: "pricing".into(),
            patterns: vec![
                r"\bpre[cç]os?\b".into(),
                r"\bvalor(es)?\b".into(),
                r"\bplanos?\b".into(),
                r"\bassinatura\b".into(),
                r"\bmensalidade\b".into(),
            ],
            replies: vec![
                "Temos planos para empresas de todos os portes. Vou chamar um consultor para detalhar os valores para o seu caso.".into(),
                "Os valores variam conforme o volume de monitoramento. Um consultor vai te atender em instantes para montar uma proposta.".into(),
            ],
            requires_human: true,
        },
        RuleSpec {
            category: "billing_issue".into(),
            patterns: vec![
                r"\bfatura\b".into(),
                r"\bcobran[cç]a\b".into(),
                r"\bboleto\b".into(),
                r"\breembolso\b".into(),
            ],
            replies: vec![
                "Entendi, questões de cobrança precisam de um atendente. Já estou te colocando na fila do financeiro.".into(),
            ],
            requires_human: true,
        },
    ]
}

fn default_topics() -> Vec<TopicDetector> {
    vec![
        TopicDetector {
            topic: "editais",
            keywords: &["edital", "editais", "pregão", "pregões", "concorrência"],
            reply: "Sobre editais e pregões:\n\
                    • O painel Monitoramento acompanha novas publicações dos portais oficiais em tempo real.\n\
                    • Você pode filtrar por órgão, modalidade e faixa de valor.\n\
                    • A análise automática destaca prazos, exigências de habilitação e riscos do edital.\n\
                    Se quiser, me diga o número do edital que você está acompanhando.",
        },
        TopicDetector {
            topic: "documentos",
            keywords: &["certidão", "certidões", "documento", "proposta", "habilitação"],
            reply: "Sobre documentos e habilitação:\n\
                    • A aba Documentos lista as certidões da sua empresa e os vencimentos de cada uma.\n\
                    • O gerador de propostas preenche os modelos exigidos pelo edital automaticamente.\n\
                    • Certidões vencidas aparecem destacadas em vermelho no painel.\n\
                    Posso ajudar com algum documento específico?",
        },
        TopicDetector {
            topic: "plataforma",
            keywords: &["cadastro", "senha", "acesso", "login"],
            reply: "Sobre acesso à plataforma:\n\
                    • A recuperação de senha fica em \"Esqueci minha senha\" na tela de login.\n\
                    • Novos usuários são convidados pelo administrador da conta em Configurações → Equipe.\n\
                    • O cadastro da empresa pode ser atualizado em Configurações → Dados da empresa.\n\
                    Se o problema persistir, posso encaminhar para o suporte técnico.",
        },
    ]
}
