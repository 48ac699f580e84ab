use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

const UNIDADES: [&str; 30] = [
    "CERO", "UNO", "DOS", "TRES", "CUATRO", "CINCO", "SEIS", "SIETE", "OCHO", "NUEVE", "DIEZ",
    "ONCE", "DOCE", "TRECE", "CATORCE", "QUINCE", "DIECISEIS", "DIECISIETE", "DIECIOCHO",
    "DIECINUEVE", "VEINTE", "VEINTIUNO", "VEINTIDOS", "VEINTITRES", "VEINTICUATRO", "VEINTICINCO",
    "VEINTISEIS", "VEINTISIETE", "VEINTIOCHO", "VEINTINUEVE",
];

const DECENAS: [&str; 10] = [
    "", "", "", "TREINTA", "CUARENTA", "CINCUENTA", "SESENTA", "SETENTA", "OCHENTA", "NOVENTA",
];

const CENTENAS: [&str; 10] = [
    "", "CIENTO", "DOSCIENTOS", "TRESCIENTOS", "CUATROCIENTOS", "QUINIENTOS", "SEISCIENTOS",
    "SETECIENTOS", "OCHOCIENTOS", "NOVECIENTOS",
];

/// Monto en letras para la adenda: `CIENTO CINCUENTA QUETZALES CON 00/100`.
pub fn amount_in_words(amount: Decimal) -> String {
    let amount = amount.abs().round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let integer = amount.trunc();
    let cents = ((amount - integer) * Decimal::ONE_HUNDRED).to_u64().unwrap_or(0);
    let integer = integer.to_u64().unwrap_or(0);

    let currency = if integer == 1 { "QUETZAL" } else { "QUETZALES" };
    format!("{} {} CON {:02}/100", number_in_words(integer, true), currency, cents)
}

/// `apocope` convierte el "UNO" final en "UN" (antes de un sustantivo).
pub fn number_in_words(n: u64, apocope: bool) -> String {
    if n == 0 {
        return "CERO".to_string();
    }

    let millions = n / 1_000_000;
    let thousands = (n / 1_000) % 1_000;
    let rest = n % 1_000;
    let mut parts: Vec<String> = Vec::new();

    if millions > 0 {
        if millions == 1 {
            parts.push("UN MILLON".to_string());
        } else {
            parts.push(format!("{} MILLONES", number_in_words(millions, true)));
        }
    }

    if thousands > 0 {
        if thousands == 1 {
            parts.push("MIL".to_string());
        } else {
            parts.push(format!("{} MIL", hundreds(thousands, true)));
        }
    }

    if rest > 0 {
        parts.push(hundreds(rest, apocope));
    }

    parts.join(" ")
}

fn hundreds(n: u64, apocope: bool) -> String {
    debug_assert!(n < 1_000);
    if n == 100 {
        return "CIEN".to_string();
    }

    let c = (n / 100) as usize;
    let rest = n % 100;
    let mut words = String::new();

    if c > 0 {
        words.push_str(CENTENAS[c]);
    }
    if rest > 0 {
        if !words.is_empty() {
            words.push(' ');
        }
        words.push_str(&tens(rest, apocope));
    }
    words
}

fn tens(n: u64, apocope: bool) -> String {
    let word = if n < 30 {
        UNIDADES[n as usize].to_string()
    } else {
        let d = (n / 10) as usize;
        let u = (n % 10) as usize;
        if u == 0 {
            DECENAS[d].to_string()
        } else {
            format!("{} Y {}", DECENAS[d], UNIDADES[u])
        }
    };

    if apocope && word.ends_with("UNO") {
        word[..word.len() - 1].to_string()
    } else {
        word
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_in_words_examples() {
        assert_eq!(amount_in_words(Decimal::new(15000, 2)), "CIENTO CINCUENTA QUETZALES CON 00/100");
        assert_eq!(amount_in_words(Decimal::new(100, 2)), "UN QUETZAL CON 00/100");
        assert_eq!(amount_in_words(Decimal::new(2575, 2)), "VEINTICINCO QUETZALES CON 75/100");
        assert_eq!(amount_in_words(Decimal::new(10005, 2)), "CIEN QUETZALES CON 05/100");
        assert_eq!(amount_in_words(Decimal::ZERO), "CERO QUETZALES CON 00/100");
    }

    #[test]
    fn test_apocope_and_large_numbers() {
        assert_eq!(number_in_words(21, true), "VEINTIUN");
        assert_eq!(number_in_words(31, true), "TREINTA Y UN");
        assert_eq!(number_in_words(31, false), "TREINTA Y UNO");
        assert_eq!(number_in_words(1_001, true), "MIL UN");
        assert_eq!(number_in_words(101_000, true), "CIENTO UN MIL");
        assert_eq!(number_in_words(21_000, true), "VEINTIUN MIL");
        assert_eq!(number_in_words(1_000_000, true), "UN MILLON");
        assert_eq!(number_in_words(2_500_000, true), "DOS MILLONES QUINIENTOS MIL");
        assert_eq!(number_in_words(1_234, true), "MIL DOSCIENTOS TREINTA Y CUATRO");
    }
}
