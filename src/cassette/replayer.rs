//! Serves recorded interactions back in order.

use std::collections::HashMap;

use super::format::{Cassette, Interaction};

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct PortMethod {
    port: String,
    method: String,
}

/// Replays a cassette, one queue per port/method pair.
pub struct CassetteReplayer {
    queues: HashMap<PortMethod, Vec<Interaction>>,
    cursors: HashMap<PortMethod, usize>,
}

impl CassetteReplayer {
    /// Indexes the interactions of `cassette`.
    #[must_use]
    pub fn new(cassette: &Cassette) -> Self {
        let mut queues: HashMap<PortMethod, Vec<Interaction>> = HashMap::new();
        for interaction in &cassette.interactions {
            let key =
                PortMethod { port: interaction.port.clone(), method: interaction.method.clone() };
            queues.entry(key).or_default().push(interaction.clone());
        }
        let cursors = queues.keys().map(|k| (k.clone(), 0)).collect();
        Self { queues, cursors }
    }

    /// Returns the next interaction recorded for `port`/`method`.
    ///
    /// # Panics
    ///
    /// Panics when the cassette holds no further interaction for the pair,
    /// naming what was asked for and what the cassette contains.
    pub fn next_interaction(&mut self, port: &str, method: &str) -> &Interaction {
        let key = PortMethod { port: port.to_string(), method: method.to_string() };

        let Some(queue) = self.queues.get(&key) else {
            let mut available: Vec<String> =
                self.queues.keys().map(|k| format!("{}::{}", k.port, k.method)).collect();
            available.sort();
            panic!(
                "Cassette exhausted: no interactions recorded for port={port:?} method={method:?}. \
                 Available port::method pairs: [{}]",
                available.join(", ")
            );
        };

        let cursor = self.cursors.entry(key).or_insert(0);
        assert!(
            *cursor < queue.len(),
            "Cassette exhausted: all {count} interactions for port={port:?} method={method:?} \
             have been consumed. Last interaction was seq={last_seq}.",
            count = queue.len(),
            last_seq = queue.last().map_or(0, |i| i.seq),
        );

        let interaction = &queue[*cursor];
        *cursor += 1;
        interaction
    }
}
