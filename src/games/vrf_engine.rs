use crate::errors::{EngineResult, ValidationError};
use crate::games::draw::{draw_numbers, DrawnOutcome, OutcomeSource};
use crate::games::types::{DrawProof, Game, Outcome};
use rand::rngs::StdRng;
use rand::SeedableRng;
use schnorrkel::{context::SigningContext, Keypair, PublicKey, Signature};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const VRF_SIGNING_CONTEXT: &[u8] = b"drawhouse-draw";

/// Verifiable draw source: the house signs the game identity and the
/// SHA-256 of that signature seeds the sampler.
pub struct VrfOutcomeSource {
    keypair: Arc<Keypair>,
}

impl VrfOutcomeSource {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    /// Create a source with a random keypair (for testing)
    pub fn new_random() -> Self {
        use rand_core::OsRng;
        Self::new(Keypair::generate_with(OsRng))
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.keypair.public.to_bytes())
    }

    fn input_message(game: &Game) -> String {
        format!(
            "{}:{}:{}:{}of{}",
            game.id,
            game.kind,
            game.close_time.timestamp(),
            game.draw.draw_size,
            game.draw.universe_size
        )
    }

    fn sign(&self, message: &[u8]) -> ([u8; 32], [u8; 64]) {
        let ctx = SigningContext::new(VRF_SIGNING_CONTEXT);
        let signature = self.keypair.sign(ctx.bytes(message)).to_bytes();
        (output_from_signature(&signature), signature)
    }
}

fn output_from_signature(signature: &[u8; 64]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(signature);
    hasher.finalize().into()
}

impl OutcomeSource for VrfOutcomeSource {
    fn draw(&self, game: &Game) -> EngineResult<DrawnOutcome> {
        let input_message = Self::input_message(game);
        let (output, signature) = self.sign(input_message.as_bytes());

        let mut rng = StdRng::from_seed(output);
        let outcome = draw_numbers(&mut rng, game.draw.universe_size, game.draw.draw_size);

        Ok(DrawnOutcome {
            outcome,
            proof: Some(DrawProof {
                public_key: self.public_key_hex(),
                signature: hex::encode(signature),
                output: hex::encode(output),
                input_message,
            }),
        })
    }
}

/// Check a game's stored draw against its proof.
///
/// Returns `Ok(false)` for a proof that does not match; decoding failures are errors.
pub fn verify_draw(game: &Game) -> Result<bool, ValidationError> {
    let (Some(outcome), Some(proof)) = (&game.outcome, &game.draw_proof) else {
        return Ok(false);
    };

    if proof.input_message != VrfOutcomeSource::input_message(game) {
        return Ok(false);
    }

    let invalid = |what: &str, e: String| ValidationError::InvalidOutcome(format!("{}: {}", what, e));

    let public_key_bytes: [u8; 32] = hex::decode(&proof.public_key)
        .map_err(|e| invalid("public key hex", e.to_string()))?
        .try_into()
        .map_err(|_| invalid("public key", "must be 32 bytes".to_string()))?;
    let signature_bytes: [u8; 64] = hex::decode(&proof.signature)
        .map_err(|e| invalid("signature hex", e.to_string()))?
        .try_into()
        .map_err(|_| invalid("signature", "must be 64 bytes".to_string()))?;

    let public_key = PublicKey::from_bytes(&public_key_bytes)
        .map_err(|e| invalid("public key", format!("{:?}", e)))?;
    let signature = Signature::from_bytes(&signature_bytes)
        .map_err(|e| invalid("signature", format!("{:?}", e)))?;

    let ctx = SigningContext::new(VRF_SIGNING_CONTEXT);
    if public_key
        .verify(ctx.bytes(proof.input_message.as_bytes()), &signature)
        .is_err()
    {
        return Ok(false);
    }

    let output = output_from_signature(&signature_bytes);
    if hex::encode(output) != proof.output {
        return Ok(false);
    }

    let mut rng = StdRng::from_seed(output);
    let expected: Outcome = draw_numbers(&mut rng, game.draw.universe_size, game.draw.draw_size);
    Ok(&expected == outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::types::*;
    use chrono::{Duration, Utc};

    fn sample_game() -> Game {
        let now = Utc::now();
        Game {
            id: GameId::new(),
            kind: "keno".to_string(),
            label: "vrf test".to_string(),
            draw: DrawShape::default(),
            open_time: now,
            close_time: now + Duration::minutes(5),
            state: GameState::Active,
            outcome: None,
            outcome_origin: None,
            draw_proof: None,
            stake_bounds: StakeBounds::new(1, 1_000).unwrap(),
            payout_table: PayoutTable::default(),
            aggregates: GameAggregates::default(),
            created_at: now,
            settled_at: None,
        }
    }

    #[test]
    fn test_vrf_draw_verifies() {
        let source = VrfOutcomeSource::new_random();
        let mut game = sample_game();

        let drawn = source.draw(&game).expect("VRF draw failed");
        assert_eq!(drawn.outcome.len(), 20);

        game.outcome = Some(drawn.outcome);
        game.draw_proof = drawn.proof;
        assert!(verify_draw(&game).unwrap(), "VRF draw should verify");
    }

    #[test]
    fn test_vrf_tamper_detection() {
        let source = VrfOutcomeSource::new_random();
        let mut game = sample_game();
        let drawn = source.draw(&game).unwrap();

        let low: Vec<u8> = (1..=20).collect();
        let high: Vec<u8> = (61..=80).collect();
        let forged = if drawn.outcome.numbers() == low.as_slice() { high } else { low };
        game.outcome = Some(Outcome::new(forged, game.draw).unwrap());
        game.draw_proof = drawn.proof.clone();
        assert!(!verify_draw(&game).unwrap(), "Tampered draw should be invalid");

        // A proof for another game must not verify
        let mut other = sample_game();
        other.outcome = Some(drawn.outcome);
        other.draw_proof = drawn.proof;
        assert!(!verify_draw(&other).unwrap());
    }
}
