use crate::workflow::types::OutfitOption;

pub static FEMALE_OUTFITS: [OutfitOption; 3] = [
    OutfitOption {
        id: "opt1",
        label: "Classic Blazer",
        description: "Dark blazer with a crisp light blouse",
    },
    OutfitOption {
        id: "opt2",
        label: "Modern Professional",
        description: "Light grey blazer with a neutral top",
    },
    OutfitOption {
        id: "opt3",
        label: "Business Dress",
        description: "Elegant business dress with modest sleeves",
    },
];

pub const MALE_OUTFIT_PROMPT: &str = "Automatically dress him in a formal business suit: classic navy suit jacket, white dress shirt, and a professional tie.";

pub const OUTFIT_TIP: &str = "The \"Classic Blazer\" is generally preferred for strict corporate environments, while the \"Modern Professional\" look works great for creative agencies and tech startups.";

pub fn find_outfit(id: &str) -> Option<&'static OutfitOption> {
    let id = id.trim();
    FEMALE_OUTFITS.iter().find(|option| option.id == id)
}

pub fn female_outfit_prompt(outfit: &OutfitOption) -> String {
    format!(
        "Dress her in a professional business outfit: {}. It should look natural and elegant.",
        outfit.description
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_three_distinct_options() {
        assert_eq!(FEMALE_OUTFITS.len(), 3);
        let mut ids: Vec<_> = FEMALE_OUTFITS.iter().map(|option| option.id).collect();
        ids.dedup();
        assert_eq!(ids, vec!["opt1", "opt2", "opt3"]);
    }

    #[test]
    fn finds_outfits_by_id() {
        assert_eq!(find_outfit("opt2").map(|o| o.label), Some("Modern Professional"));
        assert_eq!(find_outfit(" opt3 ").map(|o| o.label), Some("Business Dress"));
        assert!(find_outfit("opt4").is_none());
    }

    #[test]
    fn female_prompt_embeds_description() {
        let prompt = female_outfit_prompt(&FEMALE_OUTFITS[0]);
        assert_eq!(
            prompt,
            "Dress her in a professional business outfit: Dark blazer with a crisp light blouse. It should look natural and elegant."
        );
    }
}
