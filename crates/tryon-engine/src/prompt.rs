const BASE_INSTRUCTIONS: &str = "\
You are given two photos. The FIRST image is the subject: a real person. \
The SECOND image is a garment.

Produce one photorealistic image of the subject from the first image wearing the garment from the second image.

Keep from the first image:
- the person's identity: face, hair, skin tone, body shape and proportions
- the exact pose, framing, camera angle and expression
- the original background and any objects around the person

Transfer from the second image:
- the garment's cut, color, pattern, fabric texture, logos and details
- fit it naturally to the subject's body and pose, with realistic folds and drape

Blend the garment into the scene:
- match the lighting direction, color temperature and intensity of the first image
- match its perspective and depth of field
- cast consistent shadows and occlusion (arms, hair and accessories stay in front where they were)

Output rules:
- a single composite image, not a collage, grid or side-by-side comparison
- no trace of the clothing the subject originally wore where the new garment goes
- no text, watermarks, borders or extra people";

/// Builds the edit prompt. Optional garment type and style hints are
/// appended after the fixed instructions.
pub fn build_tryon_prompt(garment_type: Option<&str>, style: Option<&str>) -> String {
    let mut prompt = String::from(BASE_INSTRUCTIONS);
    if let Some(garment_type) = clean_hint(garment_type) {
        prompt.push_str(&format!(
            "\n\nThe garment is a {garment_type}; replace only the matching clothing on the subject."
        ));
    }
    if let Some(style) = clean_hint(style) {
        prompt.push_str(&format!(
            "\n\nStyling note: {style}. Apply it to how the garment is worn, not to the person or background."
        ));
    }
    prompt
}

fn clean_hint(raw: Option<&str>) -> Option<String> {
    let collapsed = raw?
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(120).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_fixed_instructions() {
        let prompt = build_tryon_prompt(None, None);
        assert!(prompt.contains("FIRST image is the subject"));
        assert!(prompt.contains("SECOND image is a garment"));
        assert!(prompt.contains("match the lighting"));
        assert!(prompt.contains("single composite image"));
        assert!(!prompt.contains("Styling note"));
    }

    #[test]
    fn hints_are_normalized_and_appended() {
        let prompt = build_tryon_prompt(Some("  denim\n jacket "), Some("sleeves rolled up"));
        assert!(prompt.contains("The garment is a denim jacket;"));
        assert!(prompt.contains("Styling note: sleeves rolled up."));

        let blank = build_tryon_prompt(Some("   "), Some(""));
        assert_eq!(blank, build_tryon_prompt(None, None));
    }
}
